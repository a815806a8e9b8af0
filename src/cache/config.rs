//! Cache configuration.
//!
//! Controls member TTLs, the in-memory store and store failure handling via
//! the `[cache]` section of `typecache.toml`.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECONDS: u64 = 0;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// What a cached call does when the store fails to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFailurePolicy {
    /// Surface the store error to the caller.
    #[default]
    Fail,
    /// Compute as if the key were missing. The write-back still has to succeed.
    Miss,
}

impl ReadFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Miss => "miss",
        }
    }
}

impl fmt::Display for ReadFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "miss" => Ok(Self::Miss),
            other => Err(format!(
                "unknown read failure policy `{other}`; expected `fail` or `miss`"
            )),
        }
    }
}

/// Cache configuration from `typecache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when `enable_cache` is given none. Zero requests no expiry.
    pub default_ttl_seconds: u64,
    /// Maximum entries held by the in-memory store.
    pub memory_capacity: usize,
    /// Behaviour on store read failures.
    pub read_failure: ReadFailurePolicy,
    /// Serialize concurrent misses on the same key.
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            read_failure: ReadFailurePolicy::default(),
            coalesce_misses: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl_seconds: settings.default_ttl_seconds,
            memory_capacity: settings.memory_capacity,
            read_failure: settings.read_failure,
            coalesce_misses: settings.coalesce_misses,
        }
    }
}

impl CacheConfig {
    /// The fallback TTL, `None` when configured as zero.
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_seconds > 0).then(|| Duration::from_secs(self.default_ttl_seconds))
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
