//! Registered types and their cache bookkeeping.
//!
//! A [`TypeSpec`] describes how to build, encode and call into one Rust type.
//! Registering it produces a [`CacheableType`]: the spec extended with
//! instance- and type-level key templates, a tagging encoder and a mutable
//! member surface that `enable_cache` rewires.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::codec::{TYPE_TAG, Value};

use super::error::{CacheError, CodecError, EnableError, MethodError, RegistryError};
use super::keys::{
    DEFAULT_ITEM_KEY, DEFAULT_MEMBER_KEY, DEFAULT_TYPE_MEMBER_KEY, KeyContext, KeyTemplate,
};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::model";

/// Leading marker selecting the instance namespace in `enable_cache`.
pub const INSTANCE_MARKER: char = '.';
/// Prefix under which the uncached original of a member stays reachable.
pub const FRESH_PREFIX: &str = "fresh_";

pub(crate) type ObjectRef = Arc<dyn Any + Send + Sync>;
type ConstructFn =
    Arc<dyn Fn(Map<String, Json>) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> + Send + Sync>;
type EncodeFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Json, serde_json::Error> + Send + Sync>;
type ReviveHook = Arc<dyn Fn(&mut (dyn Any + Send + Sync)) + Send + Sync>;

/// Type-erased member body.
pub type MemberFn =
    Arc<dyn Fn(Receiver, Vec<Value>) -> BoxFuture<'static, Result<Value, MethodError>> + Send + Sync>;

/// Contract for types that can be registered without hand-written glue.
///
/// Serde provides the base encode and the constructor; everything else has a
/// default.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable registry name used when `register` is not given one.
    const MODEL_NAME: Option<&'static str> = None;

    /// Called after the value has been rebuilt from an envelope.
    fn after_revive(&mut self) {}

    /// Declares the members `enable_cache` can target.
    fn surface(_surface: &mut Surface<Self>) {}
}

/// Which namespace of a type a member lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Instance,
    Type,
}

impl Scope {
    fn default_key(self) -> &'static str {
        match self {
            Self::Instance => DEFAULT_MEMBER_KEY,
            Self::Type => DEFAULT_TYPE_MEMBER_KEY,
        }
    }
}

/// What a member is called on.
#[derive(Debug, Clone)]
pub enum Receiver {
    Instance(Instance),
    Type(Arc<CacheableType>),
}

impl Receiver {
    pub fn cacheable_type(&self) -> &Arc<CacheableType> {
        match self {
            Self::Instance(instance) => instance.cacheable_type(),
            Self::Type(ty) => ty,
        }
    }

    fn instance_of<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self {
            Self::Instance(instance) => instance.downcast::<T>(),
            Self::Type(_) => None,
        }
    }
}

impl From<Instance> for Receiver {
    fn from(instance: Instance) -> Self {
        Self::Instance(instance)
    }
}

impl From<&Instance> for Receiver {
    fn from(instance: &Instance) -> Self {
        Self::Instance(instance.clone())
    }
}

impl From<Arc<CacheableType>> for Receiver {
    fn from(ty: Arc<CacheableType>) -> Self {
        Self::Type(ty)
    }
}

/// One slot of a type's surface.
#[derive(Clone)]
pub enum Member {
    /// A plain callable member.
    Method(MemberFn),
    /// A non-callable value.
    Property(Value),
    /// A member whose calls go through the cache.
    Cached(Arc<CacheBinding>),
}

impl Member {
    pub fn is_callable(&self) -> bool {
        !matches!(self, Self::Property(_))
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(_) => f.write_str("Method(..)"),
            Self::Property(value) => f.debug_tuple("Property").field(value).finish(),
            Self::Cached(binding) => f.debug_tuple("Cached").field(binding).finish(),
        }
    }
}

/// The association between a cached member, its original body, its key
/// template and its TTL. Immutable once created by `enable_cache`.
pub struct CacheBinding {
    member: String,
    scope: Scope,
    original: MemberFn,
    key: KeyTemplate,
    ttl: Option<Duration>,
}

impl CacheBinding {
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn key(&self) -> &KeyTemplate {
        &self.key
    }

    /// TTL requested at enable time; `None` defers to the cache default.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Resolve the concrete store key for one call.
    pub fn resolve_key(&self, receiver: &Receiver) -> Result<String, CacheError> {
        let ty = receiver.cacheable_type();
        let cx = KeyContext::new()
            .with_model(ty.name())
            .with_function(&self.member);
        let key = match receiver {
            Receiver::Instance(instance) => {
                let fields = instance.encode_plain()?;
                self.key.resolve(&cx.with_fields(&fields))?
            }
            Receiver::Type(ty) => self.key.resolve(&cx.with_fields(ty.attributes()))?,
        };
        Ok(key)
    }

    /// Invoke the uncached body.
    pub fn call_original(
        &self,
        receiver: Receiver,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, MethodError>> {
        (self.original)(receiver, args)
    }
}

impl fmt::Debug for CacheBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("member", &self.member)
            .field("scope", &self.scope)
            .field("key", &self.key.as_str())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Clone, Default)]
struct Members {
    instance: HashMap<String, Member>,
    types: HashMap<String, Member>,
}

impl Members {
    fn namespace(&self, scope: Scope) -> &HashMap<String, Member> {
        match scope {
            Scope::Instance => &self.instance,
            Scope::Type => &self.types,
        }
    }

    fn namespace_mut(&mut self, scope: Scope) -> &mut HashMap<String, Member> {
        match scope {
            Scope::Instance => &mut self.instance,
            Scope::Type => &mut self.types,
        }
    }
}

/// Builder for the members and type-level attributes of `T`.
pub struct Surface<T> {
    members: Members,
    attributes: Map<String, Json>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> Surface<T> {
    fn new() -> Self {
        Self {
            members: Members::default(),
            attributes: Map::new(),
            _marker: PhantomData,
        }
    }

    /// Declare an instance method.
    pub fn method<F, Fut>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(Arc<T>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        let call: MemberFn = Arc::new(move |receiver: Receiver, args: Vec<Value>| {
            match receiver.instance_of::<T>() {
                Some(this) => body(this, args).boxed(),
                None => future::ready(Err(MethodError::wrong_receiver(
                    std::any::type_name::<T>(),
                )))
                .boxed(),
            }
        });
        self.members
            .instance
            .insert(name.to_string(), Member::Method(call));
        self
    }

    /// Declare a non-callable instance-level value.
    pub fn property(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.members
            .instance
            .insert(name.to_string(), Member::Property(value.into()));
        self
    }

    /// Declare a type-level (static) method.
    pub fn type_method<F, Fut>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        let call: MemberFn =
            Arc::new(move |_receiver: Receiver, args: Vec<Value>| body(args).boxed());
        self.members
            .types
            .insert(name.to_string(), Member::Method(call));
        self
    }

    /// Declare a non-callable type-level value.
    pub fn type_property(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.members
            .types
            .insert(name.to_string(), Member::Property(value.into()));
        self
    }

    /// Set a type-level attribute that type-level key templates can read.
    pub fn attr(&mut self, name: &str, value: impl Into<Json>) -> &mut Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

/// Everything the registry needs to know about one Rust type.
pub struct TypeSpec {
    type_id: TypeId,
    rust_type: &'static str,
    model_name: Option<String>,
    construct: Option<ConstructFn>,
    encode: Option<EncodeFn>,
    after_revive: Option<ReviveHook>,
    members: Members,
    attributes: Map<String, Json>,
}

impl TypeSpec {
    /// Derive a complete spec from a [`Model`] implementation.
    pub fn of<T: Model>() -> Self {
        let mut builder = Self::builder::<T>()
            .constructor(|fields| serde_json::from_value(Json::Object(fields)))
            .encoder(|value: &T| serde_json::to_value(value))
            .after_revive(T::after_revive)
            .members(T::surface);
        if let Some(name) = T::MODEL_NAME {
            builder = builder.name(name);
        }
        builder.build()
    }

    /// Start a hand-assembled spec.
    pub fn builder<T: Send + Sync + 'static>() -> TypeSpecBuilder<T> {
        TypeSpecBuilder {
            spec: Self {
                type_id: TypeId::of::<T>(),
                rust_type: std::any::type_name::<T>(),
                model_name: None,
                construct: None,
                encode: None,
                after_revive: None,
                members: Members::default(),
                attributes: Map::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// Name used when registration is not given one: the declared model name,
    /// else the last path segment of the Rust type.
    pub fn default_name(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| short_type_name(self.rust_type).to_string())
    }
}

/// Builder returned by [`TypeSpec::builder`].
pub struct TypeSpecBuilder<T> {
    spec: TypeSpec,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> TypeSpecBuilder<T> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.model_name = Some(name.into());
        self
    }

    pub fn constructor<F>(mut self, construct: F) -> Self
    where
        F: Fn(Map<String, Json>) -> Result<T, serde_json::Error> + Send + Sync + 'static,
    {
        self.spec.construct = Some(Arc::new(move |fields| {
            construct(fields).map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
        }));
        self
    }

    pub fn encoder<F>(mut self, encode: F) -> Self
    where
        F: Fn(&T) -> Result<Json, serde_json::Error> + Send + Sync + 'static,
    {
        self.spec.encode = Some(Arc::new(move |object: &(dyn Any + Send + Sync)| match object.downcast_ref::<T>() {
            Some(value) => encode(value),
            None => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "encoder for `{}` received a foreign object",
                std::any::type_name::<T>()
            ))),
        }));
        self
    }

    pub fn after_revive<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.spec.after_revive = Some(Arc::new(move |object: &mut (dyn Any + Send + Sync)| {
            if let Some(value) = object.downcast_mut::<T>() {
                hook(value);
            }
        }));
        self
    }

    pub fn members<F>(mut self, declare: F) -> Self
    where
        F: FnOnce(&mut Surface<T>),
    {
        let mut surface = Surface::<T>::new();
        surface.members = std::mem::take(&mut self.spec.members);
        surface.attributes = std::mem::take(&mut self.spec.attributes);
        declare(&mut surface);
        self.spec.members = surface.members;
        self.spec.attributes = surface.attributes;
        self
    }

    pub fn build(self) -> TypeSpec {
        self.spec
    }
}

/// A registered type extended with cache bookkeeping.
pub struct CacheableType {
    name: String,
    type_id: TypeId,
    rust_type: &'static str,
    construct: ConstructFn,
    encode: EncodeFn,
    after_revive: Option<ReviveHook>,
    attributes: Map<String, Json>,
    surface: RwLock<Members>,
    class_cache_keys: RwLock<Vec<KeyTemplate>>,
    item_cache_keys: RwLock<Vec<KeyTemplate>>,
}

impl CacheableType {
    /// Apply class extension to a spec. Fails when the spec lacks a base
    /// encoder or a constructor.
    pub(crate) fn extend(name: String, spec: TypeSpec) -> Result<Self, RegistryError> {
        let missing = |contract| RegistryError::MissingContract {
            name: name.clone(),
            contract,
        };
        let encode = spec.encode.ok_or_else(|| missing("encode"))?;
        let construct = spec.construct.ok_or_else(|| missing("construct"))?;
        let default_item = KeyTemplate::parse(DEFAULT_ITEM_KEY)
            .map_err(|_| missing("default item key"))?;

        Ok(Self {
            name,
            type_id: spec.type_id,
            rust_type: spec.rust_type,
            construct,
            encode,
            after_revive: spec.after_revive,
            attributes: spec.attributes,
            surface: RwLock::new(spec.members),
            class_cache_keys: RwLock::new(Vec::new()),
            item_cache_keys: RwLock::new(vec![default_item]),
        })
    }

    /// Registered name; the value written into the type tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    pub fn attributes(&self) -> &Map<String, Json> {
        &self.attributes
    }

    pub fn class_cache_keys(&self) -> Vec<KeyTemplate> {
        rw_read(&self.class_cache_keys, SOURCE, "class_cache_keys").clone()
    }

    pub fn item_cache_keys(&self) -> Vec<KeyTemplate> {
        rw_read(&self.item_cache_keys, SOURCE, "item_cache_keys").clone()
    }

    /// Append a key template. Duplicates are kept.
    pub fn add_cache_key(&self, template: KeyTemplate, class_level: bool) {
        let (lock, op) = if class_level {
            (&self.class_cache_keys, "add_cache_key.class")
        } else {
            (&self.item_cache_keys, "add_cache_key.item")
        };
        rw_write(lock, SOURCE, op).push(template);
    }

    /// The instance's resolved item keys, in template order.
    pub fn instance_cache_keys(&self, instance: &Instance) -> Result<Vec<String>, CacheError> {
        let fields = instance.encode_plain()?;
        let cx = KeyContext::new().with_model(&self.name).with_fields(&fields);
        self.item_cache_keys()
            .iter()
            .map(|template| template.resolve(&cx).map_err(CacheError::from))
            .collect()
    }

    /// The type's resolved class-level keys.
    pub fn type_cache_keys(&self) -> Result<Vec<String>, CacheError> {
        let cx = KeyContext::new()
            .with_model(&self.name)
            .with_fields(&self.attributes);
        self.class_cache_keys()
            .iter()
            .map(|template| template.resolve(&cx).map_err(CacheError::from))
            .collect()
    }

    pub fn member(&self, scope: Scope, name: &str) -> Option<Member> {
        rw_read(&self.surface, SOURCE, "member")
            .namespace(scope)
            .get(name)
            .cloned()
    }

    /// Names of every member in a namespace, sorted.
    pub fn member_names(&self, scope: Scope) -> Vec<String> {
        let surface = rw_read(&self.surface, SOURCE, "member_names");
        let mut names: Vec<String> = surface.namespace(scope).keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a member through the cache.
    ///
    /// `member_spec` starting with `.` targets the instance namespace;
    /// anything else targets the type namespace. The original stays
    /// reachable as `fresh_<member>`.
    pub fn enable_cache(
        &self,
        member_spec: &str,
        key: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<Arc<CacheBinding>, EnableError> {
        let (scope, member) = match member_spec.strip_prefix(INSTANCE_MARKER) {
            Some(member) => (Scope::Instance, member),
            None => (Scope::Type, member_spec),
        };
        let template = KeyTemplate::parse(key.unwrap_or(scope.default_key()))?.bind_function(member);

        let binding = {
            let mut surface = rw_write(&self.surface, SOURCE, "enable_cache");
            let slots = surface.namespace_mut(scope);
            let original = match slots.get(member) {
                Some(Member::Method(body)) => Arc::clone(body),
                Some(Member::Property(_)) => {
                    return Err(EnableError::NotCallable {
                        ty: self.name.clone(),
                        member: member.to_string(),
                    });
                }
                Some(Member::Cached(_)) => {
                    return Err(EnableError::AlreadyCached {
                        ty: self.name.clone(),
                        member: member.to_string(),
                    });
                }
                None => {
                    return Err(EnableError::MissingMethod {
                        ty: self.name.clone(),
                        member: member.to_string(),
                    });
                }
            };

            let binding = Arc::new(CacheBinding {
                member: member.to_string(),
                scope,
                original: Arc::clone(&original),
                key: template.clone(),
                ttl,
            });
            slots.insert(format!("{FRESH_PREFIX}{member}"), Member::Method(original));
            slots.insert(member.to_string(), Member::Cached(Arc::clone(&binding)));
            binding
        };

        self.add_cache_key(template, scope == Scope::Type);
        debug!(
            model = %self.name,
            member,
            ?scope,
            key = binding.key().as_str(),
            ttl_secs = ttl.map(|ttl| ttl.as_secs()),
            "Enabled member cache"
        );
        Ok(binding)
    }

    /// Base encode, without the type tag.
    pub(crate) fn encode_plain(
        &self,
        object: &(dyn Any + Send + Sync),
    ) -> Result<Map<String, Json>, CodecError> {
        match (self.encode)(object).map_err(CodecError::Encode)? {
            Json::Object(fields) => Ok(fields),
            _ => Err(CodecError::NotKeyed {
                ty: self.name.clone(),
            }),
        }
    }

    /// Base encode followed by the type tag.
    pub(crate) fn encode_tagged(
        &self,
        object: &(dyn Any + Send + Sync),
    ) -> Result<Map<String, Json>, CodecError> {
        let mut fields = self.encode_plain(object)?;
        fields.insert(TYPE_TAG.to_string(), Json::String(self.name.clone()));
        Ok(fields)
    }

    /// Rebuild an instance from untagged fields and run the revive hook.
    pub(crate) fn construct(
        self: &Arc<Self>,
        fields: Map<String, Json>,
    ) -> Result<Instance, CodecError> {
        let mut object = (self.construct)(fields).map_err(|source| CodecError::Construct {
            ty: self.name.clone(),
            source,
        })?;
        if let Some(hook) = &self.after_revive {
            hook(object.as_mut());
        }
        Ok(Instance::from_parts(Arc::clone(self), Arc::from(object)))
    }
}

impl fmt::Debug for CacheableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheableType")
            .field("name", &self.name)
            .field("rust_type", &self.rust_type)
            .field("class_cache_keys", &self.class_cache_keys())
            .field("item_cache_keys", &self.item_cache_keys())
            .finish_non_exhaustive()
    }
}

/// A value of a registered type, paired with that type.
#[derive(Clone)]
pub struct Instance {
    ty: Arc<CacheableType>,
    object: ObjectRef,
}

impl Instance {
    pub(crate) fn from_parts(ty: Arc<CacheableType>, object: ObjectRef) -> Self {
        Self { ty, object }
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub fn cacheable_type(&self) -> &Arc<CacheableType> {
        &self.ty
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    /// Fields as produced by the type's base encoder.
    pub fn encode_plain(&self) -> Result<Map<String, Json>, CodecError> {
        self.ty.encode_plain(self.object.as_ref())
    }

    /// Fields plus the type tag.
    pub fn encode_tagged(&self) -> Result<Map<String, Json>, CodecError> {
        self.ty.encode_tagged(self.object.as_ref())
    }

    /// Resolved item keys of this instance.
    pub fn cache_keys(&self) -> Result<Vec<String>, CacheError> {
        self.ty.instance_cache_keys(self)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Instance");
        debug.field("type", &self.ty.name());
        match self.encode_plain() {
            Ok(fields) => debug.field("fields", &fields),
            Err(_) => debug.field("fields", &"<unencodable>"),
        };
        debug.finish()
    }
}

/// Field-for-field equality of two instances of the same registered type.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.object, &other.object) {
            return true;
        }
        self.ty.name() == other.ty.name()
            && matches!(
                (self.encode_plain(), other.encode_plain()),
                (Ok(left), Ok(right)) if left == right
            )
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
