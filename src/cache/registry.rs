//! Process-wide type registry.
//!
//! Maps stable type names to registered types so that decode can rebuild
//! instances from their type tags, and maps Rust types back to the name
//! they were registered under.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use super::error::RegistryError;
use super::lock::{rw_read, rw_write};
use super::model::{CacheableType, Instance, Model, TypeSpec};

const SOURCE: &str = "cache::registry";

static GLOBAL: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::new()));

/// Name → type table plus the write-once real-name marker per Rust type.
pub struct TypeRegistry {
    by_name: RwLock<HashMap<String, Arc<CacheableType>>>,
    by_type: RwLock<HashMap<TypeId, String>>,
    sealed: AtomicBool,
}

impl TypeRegistry {
    /// An empty registry, isolated from the global one.
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Register a type.
    ///
    /// The name is `name` when given, else the spec's declared model name,
    /// else the short Rust type name.
    pub fn register(
        &self,
        spec: TypeSpec,
        name: Option<&str>,
    ) -> Result<Arc<CacheableType>, RegistryError> {
        let name = name.map_or_else(|| spec.default_name(), str::to_string);
        if self.is_sealed() {
            return Err(RegistryError::Sealed { name });
        }

        let mut by_name = rw_write(&self.by_name, SOURCE, "register.by_name");
        let mut by_type = rw_write(&self.by_type, SOURCE, "register.by_type");
        if by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateType { name });
        }
        if let Some(existing) = by_type.get(&spec.type_id()) {
            return Err(RegistryError::AlreadyMarked {
                rust_type: spec.rust_type(),
                existing: existing.clone(),
            });
        }

        let type_id = spec.type_id();
        let rust_type = spec.rust_type();
        let ty = Arc::new(CacheableType::extend(name.clone(), spec)?);
        by_type.insert(type_id, name.clone());
        by_name.insert(name.clone(), Arc::clone(&ty));

        debug!(model = %name, rust_type, "Registered cacheable type");
        Ok(ty)
    }

    /// Register a [`Model`] implementation.
    pub fn register_model<T: Model>(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<CacheableType>, RegistryError> {
        self.register(TypeSpec::of::<T>(), name)
    }

    /// Look up a type by registered name. Absence is not an error.
    pub fn resolve(&self, name: &str) -> Option<Arc<CacheableType>> {
        rw_read(&self.by_name, SOURCE, "resolve").get(name).cloned()
    }

    /// Look up the type a Rust type was registered as.
    pub fn resolve_type<T: 'static>(&self) -> Option<Arc<CacheableType>> {
        let name = self.name_of::<T>()?;
        self.resolve(&name)
    }

    /// The real-name marker of a Rust type.
    pub fn name_of<T: 'static>(&self) -> Option<String> {
        rw_read(&self.by_type, SOURCE, "name_of")
            .get(&TypeId::of::<T>())
            .cloned()
    }

    /// Wrap a value of a registered Rust type.
    pub fn instance<T: Send + Sync + 'static>(&self, value: T) -> Result<Instance, RegistryError> {
        let ty = self
            .resolve_type::<T>()
            .ok_or(RegistryError::Unregistered {
                rust_type: std::any::type_name::<T>(),
            })?;
        Ok(Instance::from_parts(ty, Arc::new(value)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = rw_read(&self.by_name, SOURCE, "names")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        rw_read(&self.by_name, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further registrations.
    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::AcqRel) {
            debug!(types = self.len(), "Sealed type registry");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("names", &self.names())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct User {
        id: u32,
    }

    impl Model for User {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Account {
        id: u32,
    }

    impl Model for Account {
        const MODEL_NAME: Option<&'static str> = Some("acct");
    }

    #[test]
    fn names_fall_back_from_argument_to_model_name_to_rust_name() {
        let registry = TypeRegistry::new();
        let user = registry.register_model::<User>(None).expect("user registers");
        let account = registry
            .register_model::<Account>(None)
            .expect("account registers");

        assert_eq!(user.name(), "User");
        assert_eq!(account.name(), "acct");
        assert_eq!(registry.names(), vec!["User", "acct"]);
        assert_eq!(registry.name_of::<Account>().as_deref(), Some("acct"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = TypeRegistry::new();
        registry
            .register_model::<User>(Some("Shared"))
            .expect("first registers");

        let err = registry
            .register_model::<Account>(Some("Shared"))
            .expect_err("name taken");
        assert!(matches!(err, RegistryError::DuplicateType { ref name } if name == "Shared"));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve_type::<Account>().is_none());
    }

    #[test]
    fn distinct_names_both_resolve() {
        let registry = TypeRegistry::new();
        registry.register_model::<User>(None).expect("user");
        registry.register_model::<Account>(Some("Account")).expect("account");

        assert!(registry.resolve("User").is_some());
        assert!(registry.resolve("Account").is_some());
        assert!(registry.resolve("Nobody").is_none());
    }

    #[test]
    fn a_rust_type_is_marked_once() {
        let registry = TypeRegistry::new();
        registry.register_model::<User>(None).expect("user");

        let err = registry
            .register_model::<User>(Some("Other"))
            .expect_err("already marked");
        assert!(matches!(err, RegistryError::AlreadyMarked { ref existing, .. } if existing == "User"));
    }

    #[test]
    fn sealed_registries_refuse_registration() {
        let registry = TypeRegistry::new();
        registry.register_model::<User>(None).expect("user");
        registry.seal();

        assert!(registry.is_sealed());
        let err = registry
            .register_model::<Account>(None)
            .expect_err("sealed");
        assert!(matches!(err, RegistryError::Sealed { .. }));
        assert!(registry.resolve("User").is_some());
    }

    #[test]
    fn instances_require_registration() {
        let registry = TypeRegistry::new();
        let err = registry.instance(User { id: 1 }).expect_err("unregistered");
        assert!(matches!(err, RegistryError::Unregistered { .. }));

        registry.register_model::<User>(None).expect("user");
        let instance = registry.instance(User { id: 1 }).expect("registered");
        assert_eq!(instance.type_name(), "User");
        assert_eq!(instance.cache_keys().expect("keys"), vec!["User:1"]);
    }
}
