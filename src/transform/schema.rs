//! # Payload Schema
//!
//! Field-level schemas attached to entrances. Filtering a payload through a
//! schema keeps only the declared fields, fills defaults, coerces query-string
//! values to their declared types and enforces the declared rules. Unknown
//! fields are dropped silently.
//!
//! ```yaml
//! payload:
//!   - key: page
//!     type: integer
//!     default: 1
//!     rules:
//!       - min: 1
//!   - key: name
//!     type: string
//!     rules:
//!       - required: true
//!         message: name is required
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::core::error::{codes, GatewayError, GatewayResult};
use crate::transform::path::scalar_to_string;

/// Declared type of a payload field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// One validation rule; every populated member is checked
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default, rename = "enum")]
    pub one_of: Option<Vec<Value>>,

    /// Message reported when this rule fails
    #[serde(default)]
    pub message: Option<String>,

    /// Error code reported when this rule fails
    #[serde(default)]
    pub code: Option<u32>,
}

/// Schema entry for a single payload field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,

    #[serde(default, rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

impl FieldSpec {
    /// Required string field used for appended signature fields
    pub fn required_string(key: &str, message: &str, code: u32) -> Self {
        Self {
            key: key.to_string(),
            field_type: FieldType::String,
            default: None,
            rules: vec![FieldRule {
                required: true,
                message: Some(message.to_string()),
                code: Some(code),
                ..FieldRule::default()
            }],
        }
    }

    /// Optional string field with no rules
    pub fn optional_string(key: &str) -> Self {
        Self {
            key: key.to_string(),
            field_type: FieldType::String,
            ..Self::default()
        }
    }

    fn is_required(&self) -> bool {
        self.rules.iter().any(|r| r.required)
    }

    fn fail(&self, rule: Option<&FieldRule>, fallback: String) -> GatewayError {
        GatewayError::Validation {
            field: self.key.clone(),
            message: rule.and_then(|r| r.message.clone()).unwrap_or(fallback),
            code: rule.and_then(|r| r.code).unwrap_or(codes::VALIDATION),
        }
    }
}

/// Filter `input` through `schema`
///
/// Returns a new object holding only the declared fields, in declaration order.
pub fn filter_payload(schema: &[FieldSpec], input: &Value) -> GatewayResult<Map<String, Value>> {
    let empty = Map::new();
    let source = input.as_object().unwrap_or(&empty);
    let mut output = Map::new();

    for spec in schema {
        let raw = source.get(&spec.key).filter(|v| !is_blank(v));
        let raw = match raw {
            Some(value) => value.clone(),
            None => match &spec.default {
                Some(default) => default.clone(),
                None => {
                    if spec.is_required() {
                        let rule = spec.rules.iter().find(|r| r.required);
                        return Err(spec.fail(rule, format!("{} is required", spec.key)));
                    }
                    continue;
                }
            },
        };

        let value = coerce(spec, raw)?;
        for rule in &spec.rules {
            check_rule(spec, rule, &value)?;
        }
        output.insert(spec.key.clone(), value);
    }

    Ok(output)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn coerce(spec: &FieldSpec, value: Value) -> GatewayResult<Value> {
    let type_error = || spec.fail(None, format!("{} has an invalid type", spec.key));

    match spec.field_type {
        FieldType::Any => Ok(value),
        FieldType::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(scalar_to_string(&value))),
            _ => Err(type_error()),
        },
        FieldType::Number => match value {
            Value::Number(_) => Ok(value),
            Value::String(s) => parse_number(s.trim()).ok_or_else(type_error),
            _ => Err(type_error()),
        },
        FieldType::Integer => match value {
            Value::Number(ref n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(ref n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(type_error()),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| type_error()),
            _ => Err(type_error()),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(type_error()),
            },
            Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
            _ => Err(type_error()),
        },
        FieldType::Array => match value {
            Value::Array(_) => Ok(value),
            Value::String(s) => Ok(Value::Array(
                s.split(',').map(|part| Value::String(part.to_string())).collect(),
            )),
            _ => Err(type_error()),
        },
        FieldType::Object => match value {
            Value::Object(_) => Ok(value),
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(parsed @ Value::Object(_)) => Ok(parsed),
                _ => Err(type_error()),
            },
            _ => Err(type_error()),
        },
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

fn check_rule(spec: &FieldSpec, rule: &FieldRule, value: &Value) -> GatewayResult<()> {
    if let Some(pattern) = &rule.pattern {
        let re = Regex::new(pattern)
            .map_err(|e| GatewayError::config(format!("Invalid pattern for {}: {}", spec.key, e)))?;
        if !re.is_match(&scalar_to_string(value)) {
            return Err(spec.fail(Some(rule), format!("{} does not match {}", spec.key, pattern)));
        }
    }

    if let Some(min) = rule.min {
        if measure(value).map(|m| m < min).unwrap_or(false) {
            return Err(spec.fail(Some(rule), format!("{} must be at least {}", spec.key, min)));
        }
    }

    if let Some(max) = rule.max {
        if measure(value).map(|m| m > max).unwrap_or(false) {
            return Err(spec.fail(Some(rule), format!("{} must be at most {}", spec.key, max)));
        }
    }

    if let Some(allowed) = &rule.one_of {
        let text = scalar_to_string(value);
        let found = allowed
            .iter()
            .any(|candidate| candidate == value || scalar_to_string(candidate) == text);
        if !found {
            return Err(spec.fail(Some(rule), format!("{} is not an allowed value", spec.key)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(yaml: &str) -> Vec<FieldSpec> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let spec = schema("- key: a\n- key: b\n");
        let out = filter_payload(&spec, &json!({ "a": 1, "b": "x", "c": true })).unwrap();
        assert_eq!(Value::Object(out), json!({ "a": 1, "b": "x" }));
    }

    #[test]
    fn test_query_strings_are_coerced() {
        let spec = schema(
            "- {key: page, type: integer}\n- {key: ratio, type: number}\n- {key: enabled, type: boolean}\n- {key: ids, type: array}\n",
        );
        let input = json!({ "page": "3", "ratio": "0.5", "enabled": "true", "ids": "1,2" });
        let out = filter_payload(&spec, &input).unwrap();
        assert_eq!(out["page"], json!(3));
        assert_eq!(out["ratio"], json!(0.5));
        assert_eq!(out["enabled"], json!(true));
        assert_eq!(out["ids"], json!(["1", "2"]));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let spec = schema("- {key: page, type: integer, default: 1}\n");
        let out = filter_payload(&spec, &json!({})).unwrap();
        assert_eq!(out["page"], json!(1));
    }

    #[test]
    fn test_required_uses_rule_message_and_code() {
        let spec = schema(
            "- key: name\n  rules:\n    - {required: true, message: name please, code: 4242}\n",
        );
        let err = filter_payload(&spec, &json!({ "name": "" })).unwrap_err();
        match err {
            GatewayError::Validation { field, message, code } => {
                assert_eq!(field, "name");
                assert_eq!(message, "name please");
                assert_eq!(code, 4242);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rules_pattern_range_and_enum() {
        let spec = schema(
            "- key: code\n  type: string\n  rules: [{pattern: '^[a-z]+$'}]\n- key: n\n  type: integer\n  rules: [{min: 1, max: 5}]\n- key: mode\n  rules: [{enum: [fast, slow]}]\n",
        );
        assert!(filter_payload(&spec, &json!({ "code": "abc", "n": 2, "mode": "fast" })).is_ok());
        assert!(filter_payload(&spec, &json!({ "code": "ABC" })).is_err());
        assert!(filter_payload(&spec, &json!({ "n": "9" })).is_err());
        assert!(filter_payload(&spec, &json!({ "mode": "medium" })).is_err());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let spec = schema("- {key: n, type: integer}\n");
        assert!(filter_payload(&spec, &json!({ "n": "abc" })).is_err());
        assert!(filter_payload(&spec, &json!({ "n": 1.5 })).is_err());
    }

    #[test]
    fn test_non_object_input_is_treated_as_empty() {
        let spec = schema("- {key: a, default: 7}\n");
        let out = filter_payload(&spec, &json!("scalar")).unwrap();
        assert_eq!(out["a"], json!(7));
    }
}
