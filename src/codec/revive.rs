//! Decode-time revival.
//!
//! Parsed JSON is walked once, children before parents. After a node's
//! children have been revived, an ordered list of rules is tried on the node
//! itself; the first rule that rewrites it wins. Rules also see the node's
//! source JSON, so constructors are fed the text exactly as it was stored.

use std::collections::BTreeMap;

use metrics::counter;
use serde_json::Value as Json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::cache::{CodecError, TypeRegistry};

use super::{TYPE_TAG, Value};

pub(crate) const METRIC_REVIVE_UNRESOLVED: &str = "typecache_revive_unresolved_total";

/// Outcome of applying one rule to a node.
pub(crate) enum Revival {
    Rewritten(Value),
    Unchanged(Value),
}

/// A rewrite applied to a node once its children are final.
pub(crate) trait ReviveRule: Send + Sync {
    fn apply(
        &self,
        node: Value,
        source: &Json,
        registry: &TypeRegistry,
    ) -> Result<Revival, CodecError>;
}

/// Rebuilds keyed nodes carrying a type tag into typed instances.
pub(crate) struct TypeTagRule;

/// Turns timestamp-shaped strings into point-in-time values.
pub(crate) struct TimestampRule;

pub(crate) const DEFAULT_RULES: &[&dyn ReviveRule] = &[&TypeTagRule, &TimestampRule];

impl ReviveRule for TypeTagRule {
    fn apply(
        &self,
        node: Value,
        source: &Json,
        registry: &TypeRegistry,
    ) -> Result<Revival, CodecError> {
        let Value::Object(mut fields) = node else {
            return Ok(Revival::Unchanged(node));
        };
        let tag = match fields.get(TYPE_TAG) {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Ok(Revival::Unchanged(Value::Object(fields))),
        };
        fields.remove(TYPE_TAG);

        let Some(ty) = registry.resolve(&tag) else {
            warn!(
                model = %tag,
                "Constructor for type no longer exists; dropping value"
            );
            counter!(METRIC_REVIVE_UNRESOLVED).increment(1);
            return Ok(Revival::Rewritten(Value::Absent));
        };

        let seed = match source {
            Json::Object(entries) => entries
                .iter()
                .filter(|(key, _)| key.as_str() != TYPE_TAG)
                .filter_map(|(key, raw)| {
                    let revived = fields.get(key)?;
                    Some((key.clone(), plain_seed(raw, revived)?))
                })
                .collect(),
            _ => serde_json::Map::new(),
        };
        let instance = ty.construct(seed)?;
        Ok(Revival::Rewritten(Value::Instance(instance)))
    }
}

impl ReviveRule for TimestampRule {
    fn apply(
        &self,
        node: Value,
        _source: &Json,
        _registry: &TypeRegistry,
    ) -> Result<Revival, CodecError> {
        let Value::String(text) = node else {
            return Ok(Revival::Unchanged(node));
        };
        if !looks_like_timestamp(&text) {
            return Ok(Revival::Unchanged(Value::String(text)));
        }
        match OffsetDateTime::parse(&text, &Rfc3339) {
            Ok(at) => Ok(Revival::Rewritten(Value::Timestamp(at))),
            Err(err) => {
                debug!(value = %text, error = %err, "Timestamp-shaped string is not a valid instant");
                Ok(Revival::Unchanged(Value::String(text)))
            }
        }
    }
}

/// Constructor input for one member: the stored JSON, minus members that
/// revived to nothing and minus the tags of nested instances.
fn plain_seed(raw: &Json, revived: &Value) -> Option<Json> {
    match (raw, revived) {
        (_, Value::Absent) => None,
        (Json::Object(entries), Value::Object(fields)) => Some(Json::Object(
            entries
                .iter()
                .filter_map(|(key, raw)| {
                    let revived = fields.get(key)?;
                    Some((key.clone(), plain_seed(raw, revived)?))
                })
                .collect(),
        )),
        (Json::Object(entries), Value::Instance(_)) => {
            let mut entries = entries.clone();
            entries.remove(TYPE_TAG);
            Some(Json::Object(entries))
        }
        (Json::Array(items), Value::Array(values)) => Some(Json::Array(
            items
                .iter()
                .zip(values)
                .map(|(raw, revived)| plain_seed(raw, revived).unwrap_or(Json::Null))
                .collect(),
        )),
        (raw, _) => Some(raw.clone()),
    }
}

/// `^[0-9-]+T[0-9:.]+Z$`
pub(crate) fn looks_like_timestamp(text: &str) -> bool {
    let Some(body) = text.strip_suffix('Z') else {
        return false;
    };
    let Some((date, time)) = body.split_once('T') else {
        return false;
    };
    !date.is_empty()
        && !time.is_empty()
        && date.bytes().all(|b| b.is_ascii_digit() || b == b'-')
        && time
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b':' || b == b'.')
}

/// Post-order visitor over parsed JSON.
pub(crate) struct Reviver<'a> {
    registry: &'a TypeRegistry,
    rules: &'a [&'a dyn ReviveRule],
}

impl<'a> Reviver<'a> {
    pub(crate) fn new(registry: &'a TypeRegistry) -> Self {
        Self::with_rules(registry, DEFAULT_RULES)
    }

    pub(crate) fn with_rules(registry: &'a TypeRegistry, rules: &'a [&'a dyn ReviveRule]) -> Self {
        Self { registry, rules }
    }

    pub(crate) fn revive(&self, json: &Json) -> Result<Value, CodecError> {
        let node = match json {
            Json::Null => Value::Null,
            Json::Bool(flag) => Value::Bool(*flag),
            Json::Number(number) => Value::Number(number.clone()),
            Json::String(text) => Value::String(text.clone()),
            Json::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.revive(item))
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(entries) => {
                let mut fields = BTreeMap::new();
                for (key, value) in entries {
                    match self.revive(value)? {
                        Value::Absent => {}
                        revived => {
                            fields.insert(key.clone(), revived);
                        }
                    }
                }
                Value::Object(fields)
            }
        };
        self.apply_rules(node, json)
    }

    fn apply_rules(&self, mut node: Value, source: &Json) -> Result<Value, CodecError> {
        for rule in self.rules {
            match rule.apply(node, source, self.registry)? {
                Revival::Rewritten(value) => return Ok(value),
                Revival::Unchanged(value) => node = value,
            }
        }
        Ok(node)
    }
}
