use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::ClassCache;
use super::error::CacheError;
use super::keys::KeyTemplate;
use super::model::{CacheBinding, CacheableType, Receiver, Scope};
use crate::codec::Value;

/// Handle to a member routed through the cache.
///
/// `call` goes through the store; `original` always runs the uncached body.
#[derive(Clone)]
pub struct CachedMethod {
    cache: ClassCache,
    ty: Arc<CacheableType>,
    binding: Arc<CacheBinding>,
}

impl CachedMethod {
    pub(crate) fn new(cache: ClassCache, ty: Arc<CacheableType>, binding: Arc<CacheBinding>) -> Self {
        Self { cache, ty, binding }
    }

    pub fn name(&self) -> &str {
        self.binding.member()
    }

    pub fn scope(&self) -> Scope {
        self.binding.scope()
    }

    pub fn cacheable_type(&self) -> &Arc<CacheableType> {
        &self.ty
    }

    pub fn key_template(&self) -> &KeyTemplate {
        self.binding.key()
    }

    /// TTL written with each stored result.
    pub fn ttl(&self) -> Option<Duration> {
        self.binding
            .ttl()
            .or_else(|| self.cache.config().default_ttl())
    }

    /// Cache-checked call.
    ///
    /// A result of [`Value::Absent`] is returned but never stored, so every
    /// such call runs the member again.
    pub async fn call(
        &self,
        receiver: impl Into<Receiver>,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        let receiver = self.receiver(receiver.into());
        self.cache.cached_call(&self.binding, receiver, args).await
    }

    /// Cache-checked call of a type-level member.
    pub async fn call_type(&self, args: Vec<Value>) -> Result<Value, CacheError> {
        self.call(Arc::clone(&self.ty), args).await
    }

    /// Run the uncached body, bypassing the store entirely.
    pub async fn original(
        &self,
        receiver: impl Into<Receiver>,
        args: Vec<Value>,
    ) -> Result<Value, CacheError> {
        let receiver = self.receiver(receiver.into());
        self.binding
            .call_original(receiver, args)
            .await
            .map_err(|source| CacheError::method(self.name(), source))
    }

    fn receiver(&self, receiver: Receiver) -> Receiver {
        match self.binding.scope() {
            Scope::Instance => receiver,
            Scope::Type => Receiver::Type(Arc::clone(&self.ty)),
        }
    }
}

impl fmt::Debug for CachedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMethod")
            .field("model", &self.ty.name())
            .field("binding", &self.binding)
            .finish()
    }
}
