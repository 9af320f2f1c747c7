//! Restricted JSON-Schema-subset used for tool parameter validation.
//!
//! The engine does not pull in a general-purpose `jsonschema` crate: the
//! subset a tool parameter list needs is small (object type, a handful of
//! primitive property types, `enum`, `items`, `required`) and is cheap to
//! validate by hand, in the same spirit as a hand-rolled
//! `ToolParameter`/`ToolParameterType` model — this module just targets raw
//! `serde_json::Value` schemas instead of a bespoke struct so it can report
//! the offending path back to the caller.
//!
//! # Example
//!
//! ```rust
//! use agentcore::schema::validate;
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": { "city": { "type": "string" } },
//!     "required": ["city"]
//! });
//! assert!(validate(&schema, &json!({"city": "Paris"})).is_ok());
//! assert!(validate(&schema, &json!({})).is_err());
//! ```

use serde_json::Value;

/// A schema validation failure: the dotted path into the argument value where
/// the mismatch was detected, plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validate `value` against `schema`, returning the path and message of the
/// first mismatch found (depth-first, property declaration order).
pub fn validate(schema: &Value, value: &Value) -> Result<(), SchemaError> {
    validate_at("$", schema, value)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn validate_at(path: &str, schema: &Value, value: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or_else(|| {
        SchemaError::at(path, "schema node must be a JSON object")
    })?;

    if let Some(declared_type) = schema_obj.get("type").and_then(Value::as_str) {
        if !type_matches(declared_type, value) {
            return Err(SchemaError::at(
                path,
                format!(
                    "expected type '{}', found '{}'",
                    declared_type,
                    type_name(value)
                ),
            ));
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(SchemaError::at(path, "value is not one of the enum options"));
        }
    }

    match schema_obj.get("type").and_then(Value::as_str) {
        Some("object") => {
            let value_obj = value.as_object().ok_or_else(|| {
                SchemaError::at(path, format!("expected object, found '{}'", type_name(value)))
            })?;
            if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
                for name in required {
                    let name = name.as_str().unwrap_or_default();
                    if !value_obj.contains_key(name) {
                        return Err(SchemaError::at(
                            format!("{}.{}", path, name),
                            "missing required property",
                        ));
                    }
                }
            }
            if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
                for (name, prop_schema) in properties {
                    if let Some(prop_value) = value_obj.get(name) {
                        validate_at(&format!("{}.{}", path, name), prop_schema, prop_value)?;
                    }
                }
            }
        }
        Some("array") => {
            let items = value.as_array().ok_or_else(|| {
                SchemaError::at(path, format!("expected array, found '{}'", type_name(value)))
            })?;
            if let Some(item_schema) = schema_obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(&format!("{}[{}]", path, i), item_schema, item)?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}
