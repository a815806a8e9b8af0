//! Self-describing JSON envelopes.
//!
//! Instances of registered types are written with a [`TYPE_TAG`] field
//! naming their type, and timestamps as millisecond UTC strings. Decoding
//! parses the JSON and then revives both, consulting the registry for
//! constructors.

mod revive;
mod value;

use std::sync::Arc;

use serde_json::{Map, Value as Json};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::cache::{CodecError, TypeRegistry};

pub(crate) use revive::METRIC_REVIVE_UNRESOLVED;
pub use value::Value;

/// Reserved field carrying the registered type name of an encoded instance.
pub const TYPE_TAG: &str = "__cachedname";

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

/// Encoder/decoder bound to one registry.
#[derive(Debug, Clone)]
pub struct Codec {
    registry: Arc<TypeRegistry>,
}

impl Codec {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Encode a value to envelope text.
    pub fn encode(&self, value: &Value) -> Result<String, CodecError> {
        let json = lower(value)?.unwrap_or(Json::Null);
        serde_json::to_string(&json).map_err(CodecError::Encode)
    }

    /// Decode envelope text, reviving typed instances and timestamps.
    pub fn decode(&self, text: &str) -> Result<Value, CodecError> {
        let json: Json = serde_json::from_str(text).map_err(CodecError::Parse)?;
        revive::Reviver::new(&self.registry).revive(&json)
    }

    /// Decode and downcast the root instance.
    ///
    /// `Ok(None)` when the root is not an instance of `T`, including when its
    /// type could not be revived.
    pub fn decode_as<T: Send + Sync + 'static>(
        &self,
        text: &str,
    ) -> Result<Option<Arc<T>>, CodecError> {
        Ok(match self.decode(text)? {
            Value::Instance(instance) => instance.downcast::<T>(),
            _ => None,
        })
    }
}

/// Format a timestamp the way envelopes store it.
pub fn format_timestamp(at: OffsetDateTime) -> Result<String, CodecError> {
    Ok(at.to_offset(UtcOffset::UTC).format(TIMESTAMP_FORMAT)?)
}

/// Lower a value tree to JSON. `None` stands for an absent value.
fn lower(value: &Value) -> Result<Option<Json>, CodecError> {
    let json = match value {
        Value::Absent => return Ok(None),
        Value::Null => Json::Null,
        Value::Bool(flag) => Json::Bool(*flag),
        Value::Number(number) => Json::Number(number.clone()),
        Value::String(text) => Json::String(text.clone()),
        Value::Timestamp(at) => Json::String(format_timestamp(*at)?),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| Ok(lower(item)?.unwrap_or(Json::Null)))
                .collect::<Result<_, CodecError>>()?,
        ),
        Value::Object(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (key, field) in fields {
                if let Some(json) = lower(field)? {
                    map.insert(key.clone(), json);
                }
            }
            Json::Object(map)
        }
        Value::Instance(instance) => Json::Object(instance.encode_tagged()?),
    };
    Ok(Some(json))
}
