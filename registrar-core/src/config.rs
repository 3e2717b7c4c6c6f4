//! Policy configuration schemas and immutable configuration instances.
//!
//! A [`ConfigSchema`] declares the typed fields a policy accepts, their
//! defaults, and optionally a store path prefix whose documents configure
//! instances at runtime. [`ConfigSchema::parse`] validates one named document
//! into a [`Config`].
//!
//! [`Config`] has no mutating API: once parsed it is shared as
//! `Arc<Config>` between the aggregator, the manager and workers.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::ConfigValidationError;
use crate::types::InstanceName;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Accepted JSON type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bool,
    Number,
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Number => value.is_number(),
            FieldKind::Any => true,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bool => "boolean",
            FieldKind::Number => "number",
            FieldKind::Any => "value",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub default: Option<Value>,
    pub required: bool,
}

/// Typed field declarations plus an optional store binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
    fields: Vec<FieldSpec>,
    store_path: Option<String>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optional field without a default.
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            kind,
            default: None,
            required: false,
        })
    }

    /// Field filled with `default` when the document omits it.
    pub fn field_with_default(
        self,
        name: impl Into<String>,
        kind: FieldKind,
        default: impl Into<Value>,
    ) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            kind,
            default: Some(default.into()),
            required: false,
        })
    }

    /// Field every document must provide.
    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            kind,
            default: None,
            required: true,
        })
    }

    /// Bind the schema to a store prefix: every document directly under
    /// `prefix` configures one instance named after its last path segment.
    pub fn store_path(mut self, prefix: impl Into<String>) -> Self {
        self.store_path = Some(prefix.into());
        self
    }

    fn push(mut self, spec: FieldSpec) -> Self {
        self.fields.retain(|existing| existing.name != spec.name);
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn store_prefix(&self) -> Option<&str> {
        self.store_path.as_deref()
    }

    /// Validate `document` as the configuration of instance `name`.
    ///
    /// `null` field values count as absent.
    pub fn parse(
        &self,
        name: &InstanceName,
        document: &Value,
    ) -> Result<Config, ConfigValidationError> {
        let empty = serde_json::Map::new();
        let object = match document {
            Value::Object(object) => object,
            Value::Null => &empty,
            other => {
                return Err(ConfigValidationError::NotAnObject {
                    instance: name.clone(),
                    found: json_type(other),
                })
            }
        };

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.fields.iter().any(|spec| &spec.name == *key))
        {
            return Err(ConfigValidationError::UnknownField {
                instance: name.clone(),
                field: unknown.clone(),
            });
        }

        let mut values = BTreeMap::new();
        for spec in &self.fields {
            let value = match object.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(ConfigValidationError::WrongType {
                            instance: name.clone(),
                            field: spec.name.clone(),
                            expected: spec.kind.label(),
                        });
                    }
                    value.clone()
                }
                None => match (&spec.default, spec.required) {
                    (Some(default), _) => default.clone(),
                    (None, true) => {
                        return Err(ConfigValidationError::MissingField {
                            instance: name.clone(),
                            field: spec.name.clone(),
                        })
                    }
                    (None, false) => continue,
                },
            };
            values.insert(spec.name.clone(), value);
        }

        Ok(Config {
            name: name.clone(),
            values,
        })
    }

    /// Decode a raw JSON string (a store node value) and validate it.
    pub fn parse_str(
        &self,
        name: &InstanceName,
        raw: &str,
    ) -> Result<Config, ConfigValidationError> {
        let document: Value =
            serde_json::from_str(raw).map_err(|err| ConfigValidationError::Malformed {
                instance: name.clone(),
                message: err.to_string(),
            })?;
        self.parse(name, &document)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Validated configuration of one policy instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    name: InstanceName,
    values: BTreeMap<String, Value>,
}

impl Config {
    pub fn name(&self) -> &InstanceName {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Field values as one JSON object, for logging.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .field_with_default("domain", FieldKind::String, "skydns.local")
            .required("network", FieldKind::String)
            .field("weight", FieldKind::Number)
    }

    fn name() -> InstanceName {
        InstanceName::from("test")
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = schema()
            .parse(&name(), &json!({ "network": "kontena" }))
            .expect("valid");
        assert_eq!(config.str("domain"), Some("skydns.local"));
        assert_eq!(config.str("network"), Some("kontena"));
        assert_eq!(config.get("weight"), None);
        assert_eq!(config.name(), &name());
    }

    #[test]
    fn null_counts_as_absent() {
        let config = schema()
            .parse(&name(), &json!({ "network": "n", "domain": null }))
            .expect("valid");
        assert_eq!(config.str("domain"), Some("skydns.local"));
    }

    #[rstest]
    #[case(json!({}), "missing required field 'network'")]
    #[case(json!({ "network": 5 }), "field 'network' must be a string")]
    #[case(json!({ "network": "n", "extra": 1 }), "unknown field 'extra'")]
    #[case(json!(["network"]), "expected a mapping document, got array")]
    fn invalid_documents_are_rejected(#[case] document: Value, #[case] message: &str) {
        let err = schema().parse(&name(), &document).unwrap_err();
        assert!(
            err.to_string().contains(message),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn parse_str_reports_malformed_json() {
        let err = schema().parse_str(&name(), "{not json").unwrap_err();
        assert!(matches!(err, ConfigValidationError::Malformed { .. }));
    }

    #[test]
    fn redeclaring_a_field_replaces_it() {
        let schema = ConfigSchema::new()
            .field("a", FieldKind::String)
            .required("a", FieldKind::Bool);
        assert_eq!(schema.fields().len(), 1);
        assert!(schema.fields()[0].required);
    }

    #[test]
    fn to_json_round_trips_values() {
        let config = schema()
            .parse(&name(), &json!({ "network": "n", "weight": 2 }))
            .expect("valid");
        assert_eq!(
            config.to_json(),
            json!({ "domain": "skydns.local", "network": "n", "weight": 2 })
        );
        assert_eq!(config.number("weight"), Some(2.0));
    }
}
