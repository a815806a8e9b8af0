//! Error taxonomy for registration, key resolution, encoding and store access.

use thiserror::Error;

/// Registration-time failures. These indicate programming errors and are
/// returned synchronously.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("type `{name}` is already registered")]
    DuplicateType { name: String },
    #[error("type `{name}` does not provide the required `{contract}` operation")]
    MissingContract {
        name: String,
        contract: &'static str,
    },
    #[error("registry is sealed; refusing to register `{name}`")]
    Sealed { name: String },
    #[error("rust type `{rust_type}` is already registered as `{existing}`")]
    AlreadyMarked {
        rust_type: &'static str,
        existing: String,
    },
    #[error("rust type `{rust_type}` has not been registered")]
    Unregistered { rust_type: &'static str },
}

/// Failures while parsing or resolving a key template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("malformed key template `{template}`: {reason}")]
    Malformed {
        template: String,
        reason: &'static str,
    },
    #[error("placeholder `{{{placeholder}}}` in `{template}` has no value")]
    Unresolved {
        template: String,
        placeholder: String,
    },
    #[error("placeholder `{{{placeholder}}}` in `{template}` is not a scalar")]
    NonScalar {
        template: String,
        placeholder: String,
    },
}

/// Failures raised by `enable_cache`.
#[derive(Debug, Error)]
pub enum EnableError {
    #[error("type `{ty}` has no member `{member}`")]
    MissingMethod { ty: String, member: String },
    #[error("member `{member}` of type `{ty}` is not callable")]
    NotCallable { ty: String, member: String },
    #[error("member `{member}` of type `{ty}` is already cached")]
    AlreadyCached { ty: String, member: String },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Failures while turning values into envelope text or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("type `{ty}` did not encode to a keyed structure")]
    NotKeyed { ty: String },
    #[error("failed to construct `{ty}` from envelope: {source}")]
    Construct {
        ty: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by a backing store.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    Backend { message: String },
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Failure raised by an application member.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MethodError {
    message: String,
}

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn wrong_receiver(expected: &'static str) -> Self {
        Self::new(format!("receiver is not a `{expected}`"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Aggregate error returned by the [`ClassCache`](super::ClassCache) façade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Enable(#[from] EnableError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("member `{member}` failed: {source}")]
    Method {
        member: String,
        #[source]
        source: MethodError,
    },
    #[error("type `{ty}` has no member `{member}`")]
    UnknownMember { ty: String, member: String },
    #[error("member `{member}` of type `{ty}` is not callable")]
    NotCallable { ty: String, member: String },
}

impl CacheError {
    pub(crate) fn method(member: impl Into<String>, source: MethodError) -> Self {
        Self::Method {
            member: member.into(),
            source,
        }
    }
}
