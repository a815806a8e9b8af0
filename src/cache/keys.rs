//! Key templates.
//!
//! A template is a string with `{name}` placeholders. Field placeholders read
//! from the encoded fields of an instance (or the attributes of a type), and
//! dotted names walk nested objects. Two names are reserved:
//!
//! - `{_model_}` resolves to the registered type name;
//! - `{_fn_}` resolves to the identity of the cached member.
//!
//! `{{` and `}}` produce literal braces.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value as Json};

use super::error::TemplateError;

pub const MODEL_PLACEHOLDER: &str = "_model_";
pub const FUNCTION_PLACEHOLDER: &str = "_fn_";

/// Instance-level key every registered type starts with.
pub const DEFAULT_ITEM_KEY: &str = "{_model_}:{id}";
/// Default key for a cached instance member.
pub const DEFAULT_MEMBER_KEY: &str = "{_model_}:{_fn_}:{id}";
/// Default key for a cached type-level member.
pub const DEFAULT_TYPE_MEMBER_KEY: &str = "{_model_}:{_fn_}";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Model,
    Function,
    Field(String),
}

/// A parsed, immutable key template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// Values a template is resolved against.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyContext<'a> {
    model: Option<&'a str>,
    function: Option<&'a str>,
    fields: Option<&'a Map<String, Json>>,
}

impl<'a> KeyContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: &'a str) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_function(mut self, function: &'a str) -> Self {
        self.function = Some(function);
        self
    }

    pub fn with_fields(mut self, fields: &'a Map<String, Json>) -> Self {
        self.fields = Some(fields);
        self
    }

    fn field(&self, path: &str) -> Option<&'a Json> {
        let mut parts = path.split('.');
        let mut current = self.fields?.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

impl KeyTemplate {
    /// Parse a template, rejecting unbalanced braces and invalid names.
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let malformed = |reason| TemplateError::Malformed {
            template: source.clone(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(malformed("unmatched `}`")),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) if is_name_char(c) => name.push(c),
                            Some(_) => return Err(malformed("invalid character in placeholder")),
                            None => return Err(malformed("unclosed placeholder")),
                        }
                    }
                    if name.is_empty() || name.split('.').any(str::is_empty) {
                        return Err(malformed("empty placeholder name"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(match name.as_str() {
                        MODEL_PLACEHOLDER => Segment::Model,
                        FUNCTION_PLACEHOLDER => Segment::Function,
                        _ => Segment::Field(name),
                    });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Replace every `{_fn_}` with a fixed member identity.
    pub fn bind_function(&self, function: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let segment = match segment {
                Segment::Function => Segment::Literal(function.to_string()),
                other => other.clone(),
            };
            if let (Segment::Literal(next), Some(Segment::Literal(prev))) =
                (&segment, segments.last_mut())
            {
                prev.push_str(next);
                continue;
            }
            segments.push(segment);
        }
        Self {
            source: render(&segments),
            segments,
        }
    }

    /// Names of every placeholder, reserved ones included, in order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Literal(_) => None,
            Segment::Model => Some(MODEL_PLACEHOLDER),
            Segment::Function => Some(FUNCTION_PLACEHOLDER),
            Segment::Field(name) => Some(name.as_str()),
        })
    }

    /// Substitute every placeholder, failing on the first that has no value.
    pub fn resolve(&self, cx: &KeyContext<'_>) -> Result<String, TemplateError> {
        let mut key = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Model => {
                    let model = cx.model.ok_or_else(|| self.unresolved(MODEL_PLACEHOLDER))?;
                    key.push_str(model);
                }
                Segment::Function => {
                    let function = cx
                        .function
                        .ok_or_else(|| self.unresolved(FUNCTION_PLACEHOLDER))?;
                    key.push_str(function);
                }
                Segment::Field(path) => {
                    let value = cx.field(path).ok_or_else(|| self.unresolved(path))?;
                    match value {
                        Json::String(text) => key.push_str(text),
                        Json::Number(number) => key.push_str(&number.to_string()),
                        Json::Bool(flag) => key.push_str(if *flag { "true" } else { "false" }),
                        Json::Null | Json::Array(_) | Json::Object(_) => {
                            return Err(TemplateError::NonScalar {
                                template: self.source.clone(),
                                placeholder: path.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(key)
    }

    fn unresolved(&self, placeholder: &str) -> TemplateError {
        TemplateError::Unresolved {
            template: self.source.clone(),
            placeholder: placeholder.to_string(),
        }
    }
}

impl FromStr for KeyTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => {
                for ch in text.chars() {
                    match ch {
                        '{' => out.push_str("{{"),
                        '}' => out.push_str("}}"),
                        other => out.push(other),
                    }
                }
            }
            Segment::Model => out.push_str("{_model_}"),
            Segment::Function => out.push_str("{_fn_}"),
            Segment::Field(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Json) -> Map<String, Json> {
        match value {
            Json::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn resolves_model_and_field_placeholders() {
        let template = KeyTemplate::parse(DEFAULT_ITEM_KEY).expect("default key parses");
        let fields = fields(json!({ "id": 42, "name": "ada" }));
        let cx = KeyContext::new().with_model("User").with_fields(&fields);

        assert_eq!(template.resolve(&cx).expect("resolves"), "User:42");
    }

    #[test]
    fn dotted_placeholders_walk_nested_objects() {
        let template = KeyTemplate::parse("team:{owner.id}:{owner.active}").expect("parses");
        let fields = fields(json!({ "owner": { "id": "u-1", "active": true } }));
        let cx = KeyContext::new().with_fields(&fields);

        assert_eq!(template.resolve(&cx).expect("resolves"), "team:u-1:true");
    }

    #[test]
    fn doubled_braces_are_literal() {
        let template = KeyTemplate::parse("{{raw}}:{id}").expect("parses");
        let fields = fields(json!({ "id": 1 }));
        let cx = KeyContext::new().with_fields(&fields);

        assert_eq!(template.resolve(&cx).expect("resolves"), "{raw}:1");
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for source in ["{id", "id}", "{}", "{a b}", "{owner.}"] {
            let err = KeyTemplate::parse(source).expect_err(source);
            assert!(matches!(err, TemplateError::Malformed { .. }), "{source}");
        }
    }

    #[test]
    fn missing_values_are_unresolved() {
        let template = KeyTemplate::parse("{_model_}:{_fn_}:{id}").expect("parses");
        let empty = Map::new();

        let err = template
            .resolve(&KeyContext::new().with_fields(&empty))
            .expect_err("model missing");
        assert_eq!(
            err,
            TemplateError::Unresolved {
                template: "{_model_}:{_fn_}:{id}".to_string(),
                placeholder: "_model_".to_string(),
            }
        );

        let err = template
            .resolve(&KeyContext::new().with_model("User").with_function("f"))
            .expect_err("fields missing");
        assert!(matches!(err, TemplateError::Unresolved { placeholder, .. } if placeholder == "id"));
    }

    #[test]
    fn structured_fields_are_not_scalar() {
        let template = KeyTemplate::parse("{tags}").expect("parses");
        let fields = fields(json!({ "tags": ["a", "b"] }));

        let err = template
            .resolve(&KeyContext::new().with_fields(&fields))
            .expect_err("array field");
        assert!(matches!(err, TemplateError::NonScalar { .. }));
    }

    #[test]
    fn binding_the_function_keeps_other_placeholders() {
        let template = KeyTemplate::parse(DEFAULT_MEMBER_KEY).expect("parses");
        let bound = template.bind_function("fullName");

        assert_eq!(bound.as_str(), "{_model_}:fullName:{id}");
        assert!(!bound.placeholders().any(|p| p == FUNCTION_PLACEHOLDER));

        let fields = fields(json!({ "id": 7 }));
        let cx = KeyContext::new().with_model("User").with_fields(&fields);
        assert_eq!(bound.resolve(&cx).expect("resolves"), "User:fullName:7");
    }

    #[test]
    fn binding_escapes_braces_in_member_names() {
        let bound = KeyTemplate::parse("x:{_fn_}")
            .expect("parses")
            .bind_function("{odd}");
        assert_eq!(bound.as_str(), "x:{{odd}}");
        assert_eq!(KeyTemplate::parse(bound.as_str()).expect("reparses"), bound);
    }
}
