//! Typecache Cache System
//!
//! Registers application types, routes selected members through a
//! key-value store and clears their cached state:
//!
//! - **Registry**: stable type names for decode-time revival
//! - **Key templates**: `{_model_}:{_fn_}:{id}` style store keys
//! - **Cached members**: memoized instance and type-level calls with TTLs
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `typecache.toml`:
//!
//! ```toml
//! [cache]
//! default_ttl_seconds = 0
//! memory_capacity = 10000
//! read_failure = "fail"
//! coalesce_misses = false
//! ```

mod config;
mod error;
mod keys;
mod lock;
mod method;
mod model;
mod registry;
mod store;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{Span, debug, field, instrument, warn};

use crate::codec::{Codec, Value};
use lock::{InflightLocks, InflightPermit};

pub use config::{CacheConfig, ReadFailurePolicy};
pub use error::{
    CacheError, CodecError, EnableError, MethodError, RegistryError, StoreError, TemplateError,
};
pub use keys::{
    DEFAULT_ITEM_KEY, DEFAULT_MEMBER_KEY, DEFAULT_TYPE_MEMBER_KEY, FUNCTION_PLACEHOLDER,
    KeyContext, KeyTemplate, MODEL_PLACEHOLDER,
};
pub use method::CachedMethod;
pub use model::{
    CacheBinding, CacheableType, FRESH_PREFIX, INSTANCE_MARKER, Instance, Member, MemberFn, Model,
    Receiver, Scope, Surface, TypeSpec, TypeSpecBuilder,
};
pub use registry::TypeRegistry;
pub use store::{CacheStore, MemoryStore};

pub(crate) const METRIC_HIT: &str = "typecache_hit_total";
pub(crate) const METRIC_MISS: &str = "typecache_miss_total";
pub(crate) const METRIC_STORE_ERROR: &str = "typecache_store_error_total";

/// Registry, codec and store bound together.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ClassCache {
    inner: Arc<Inner>,
}

struct Inner {
    codec: Codec,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    inflight: InflightLocks,
}

impl ClassCache {
    pub fn new(registry: Arc<TypeRegistry>, store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                codec: Codec::new(registry),
                store,
                config,
                inflight: InflightLocks::new(),
            }),
        }
    }

    /// A cache over a fresh [`MemoryStore`] sized from `config`.
    pub fn in_memory(registry: Arc<TypeRegistry>, config: CacheConfig) -> Self {
        let store = Arc::new(MemoryStore::new(&config));
        Self::new(registry, store, config)
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.inner.codec.registry()
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register a [`Model`] type.
    pub fn register<T: Model>(&self, name: Option<&str>) -> Result<Arc<CacheableType>, CacheError> {
        Ok(self.registry().register_model::<T>(name)?)
    }

    /// Register a hand-assembled spec.
    pub fn register_spec(
        &self,
        spec: TypeSpec,
        name: Option<&str>,
    ) -> Result<Arc<CacheableType>, CacheError> {
        Ok(self.registry().register(spec, name)?)
    }

    /// Wrap a value of a registered Rust type.
    pub fn instance<T: Send + Sync + 'static>(&self, value: T) -> Result<Instance, CacheError> {
        Ok(self.registry().instance(value)?)
    }

    /// Route a member of the Rust type `T` through the cache.
    ///
    /// `member_spec` is `.name` for instance members and `name` for type
    /// members. `key` defaults to `{_model_}:{_fn_}:{id}` and
    /// `{_model_}:{_fn_}` respectively; `ttl` defaults to the configured TTL.
    pub fn enable_cache<T: 'static>(
        &self,
        member_spec: &str,
        key: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<CachedMethod, CacheError> {
        let ty = self
            .registry()
            .resolve_type::<T>()
            .ok_or(RegistryError::Unregistered {
                rust_type: std::any::type_name::<T>(),
            })?;
        self.enable_cache_on(&ty, member_spec, key, ttl)
    }

    /// Route a member of an already-resolved type through the cache.
    pub fn enable_cache_on(
        &self,
        ty: &Arc<CacheableType>,
        member_spec: &str,
        key: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<CachedMethod, CacheError> {
        let binding = ty.enable_cache(member_spec, key, ttl)?;
        Ok(CachedMethod::new(self.clone(), Arc::clone(ty), binding))
    }

    /// Call an instance member by name, cached or not.
    pub async fn call(
        &self,
        instance: &Instance,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        self.dispatch(Receiver::Instance(instance.clone()), Scope::Instance, name, args)
            .await
    }

    /// Call a type-level member by name, cached or not.
    pub async fn call_type(
        &self,
        ty: &Arc<CacheableType>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        self.dispatch(Receiver::Type(Arc::clone(ty)), Scope::Type, name, args)
            .await
    }

    async fn dispatch(
        &self,
        receiver: Receiver,
        scope: Scope,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        let ty = receiver.cacheable_type();
        match ty.member(scope, name) {
            Some(Member::Method(body)) => body(receiver, args)
                .await
                .map_err(|source| CacheError::method(name, source)),
            Some(Member::Cached(binding)) => self.cached_call(&binding, receiver, args).await,
            Some(Member::Property(_)) => Err(CacheError::NotCallable {
                ty: ty.name().to_string(),
                member: name.to_string(),
            }),
            None => Err(CacheError::UnknownMember {
                ty: ty.name().to_string(),
                member: name.to_string(),
            }),
        }
    }

    /// Resolve the key, serve a hit, or compute, store and return.
    #[instrument(
        name = "typecache.cached_call",
        skip_all,
        fields(
            model = %receiver.cacheable_type().name(),
            member = binding.member(),
            key = field::Empty,
        )
    )]
    pub(crate) async fn cached_call(
        &self,
        binding: &CacheBinding,
        receiver: Receiver,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        let key = binding.resolve_key(&receiver)?;
        Span::current().record("key", key.as_str());

        if let Some(value) = self.lookup(&key).await? {
            return Ok(value);
        }

        let _permit = if self.inner.config.coalesce_misses {
            let mut permit = InflightPermit::new(&self.inner.inflight, &key);
            permit.acquire().await;
            if let Some(value) = self.lookup(&key).await? {
                return Ok(value);
            }
            Some(permit)
        } else {
            None
        };

        self.compute_and_store(binding, &key, receiver, args).await
    }

    async fn compute_and_store(
        &self,
        binding: &CacheBinding,
        key: &str,
        receiver: Receiver,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        counter!(METRIC_MISS).increment(1);
        let value = binding
            .call_original(receiver, args)
            .await
            .map_err(|source| CacheError::method(binding.member(), source))?;
        if value.is_absent() {
            debug!(key, "Member returned nothing; not storing");
            return Ok(value);
        }

        let text = self.inner.codec.encode(&value)?;
        let ttl = binding.ttl().or_else(|| self.inner.config.default_ttl());
        if let Err(err) = self.inner.store.set(key, text, ttl).await {
            counter!(METRIC_STORE_ERROR, "op" => "set").increment(1);
            return Err(err.into());
        }
        debug!(key, ttl_secs = ttl.map(|ttl| ttl.as_secs()), "Stored computed value");
        Ok(value)
    }

    async fn lookup(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let cached = match self.inner.store.get(key).await {
            Ok(cached) => cached,
            Err(err) => {
                counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
                return match self.inner.config.read_failure {
                    ReadFailurePolicy::Fail => Err(err.into()),
                    ReadFailurePolicy::Miss => {
                        warn!(key, error = %err, "Store read failed; computing instead");
                        Ok(None)
                    }
                };
            }
        };
        let Some(text) = cached else {
            return Ok(None);
        };

        match self.inner.codec.decode(&text)? {
            Value::Absent => {
                debug!(key, "Cached value can no longer be revived; recomputing");
                Ok(None)
            }
            value => {
                counter!(METRIC_HIT).increment(1);
                Ok(Some(value))
            }
        }
    }

    /// Delete every item key of an instance with one `del`.
    #[instrument(name = "typecache.clear_cache", skip_all, fields(model = %instance.type_name()))]
    pub async fn clear_cache(&self, instance: &Instance) -> Result<u64, CacheError> {
        let keys = instance.cache_keys()?;
        self.delete(keys).await
    }

    /// Delete every class-level key of a type.
    #[instrument(name = "typecache.clear_type_cache", skip_all, fields(model = %ty.name()))]
    pub async fn clear_type_cache(&self, ty: &Arc<CacheableType>) -> Result<u64, CacheError> {
        let keys = ty.type_cache_keys()?;
        self.delete(keys).await
    }

    async fn delete(&self, keys: Vec<String>) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        match self.inner.store.del(&keys).await {
            Ok(removed) => {
                debug!(requested = keys.len(), removed, "Cleared cached keys");
                Ok(removed)
            }
            Err(err) => {
                counter!(METRIC_STORE_ERROR, "op" => "del").increment(1);
                Err(err.into())
            }
        }
    }

    pub fn encode(&self, value: &Value) -> Result<String, CacheError> {
        Ok(self.inner.codec.encode(value)?)
    }

    pub fn decode(&self, text: &str) -> Result<Value, CacheError> {
        Ok(self.inner.codec.decode(text)?)
    }

    pub fn decode_as<T: Send + Sync + 'static>(
        &self,
        text: &str,
    ) -> Result<Option<Arc<T>>, CacheError> {
        Ok(self.inner.codec.decode_as::<T>(text)?)
    }
}

impl fmt::Debug for ClassCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassCache")
            .field("registry", self.registry())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
