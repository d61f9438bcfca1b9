//! # Payload Transformation
//!
//! Turns the raw request input into the payload handed to a dispatch backend,
//! and shapes backend results on the way out.
//!
//! ## Request side
//! 1. [`schema::filter_payload`] keeps declared fields, fills defaults and validates
//! 2. The route tag is injected under [`TAG_KEY`]
//! 3. Signatures are verified over this payload by the auth pipeline
//! 4. [`finish_payload`] applies the `props` mapping and strips the signature field
//!
//! ## Response side
//! [`ParseOptions`] picks a sub-tree of the backend result and fills defaults.

pub mod path;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::error::GatewayResult;
use path::{get_path, set_path};
pub use schema::{filter_payload, FieldRule, FieldSpec, FieldType};

/// Key carrying the route tag inside a payload
pub const TAG_KEY: &str = "__TAG";

/// Inputs to payload building for one request
pub struct PayloadRequest<'a> {
    pub input: &'a Value,
    pub schema: Option<&'a [FieldSpec]>,
    pub tag: Option<&'a str>,
}

/// Validated payload with the route tag injected
///
/// Without a schema the input passes through untouched (only objects are kept).
pub fn build_payload(request: PayloadRequest<'_>) -> GatewayResult<Map<String, Value>> {
    let mut payload = match request.schema {
        Some(schema) => filter_payload(schema, request.input)?,
        None => request.input.as_object().cloned().unwrap_or_default(),
    };

    if let Some(tag) = request.tag {
        payload.insert(TAG_KEY.to_string(), Value::String(tag.to_string()));
    }

    Ok(payload)
}

/// Apply the `props` mapping, then remove signature fields
pub fn finish_payload(
    payload: Map<String, Value>,
    props: Option<&BTreeMap<String, String>>,
    strip_fields: &[&str],
) -> Map<String, Value> {
    let mut payload = match props {
        Some(props) => apply_props(props, payload),
        None => payload,
    };
    for field in strip_fields {
        payload.remove(*field);
    }
    payload
}

/// Map payload fields through a `target -> source path` table
///
/// Source paths are looked up in `{payload: <data>}` first (so `payload.a.b`
/// reaches nested input) and then in the data itself. Only mapped keys are
/// kept; keys whose source resolves to nothing are omitted.
pub fn apply_props(props: &BTreeMap<String, String>, data: Map<String, Value>) -> Map<String, Value> {
    let mut wrapper = Map::new();
    wrapper.insert("payload".to_string(), Value::Object(data));
    let wrapper = Value::Object(wrapper);
    let data = &wrapper["payload"];

    let mut output = Map::new();
    for (target, source) in props {
        let found = get_path(&wrapper, source).or_else(|| get_path(data, source));
        if let Some(value) = found {
            output.insert(target.clone(), value.clone());
        }
    }
    output
}

/// Post-processing applied to backend results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Dotted path of the sub-tree to return
    #[serde(default)]
    pub path: Option<String>,

    /// Values filled in (by dotted path) when absent from the result
    #[serde(default)]
    pub default_values: Option<Map<String, Value>>,

    /// Service name run over the result after extraction
    #[serde(default)]
    pub exec: Option<String>,
}

impl ParseOptions {
    /// Apply path extraction and defaults
    ///
    /// `exec` is left to the dispatcher, which owns the service registry.
    pub fn apply(&self, result: Value) -> Value {
        let mut value = match &self.path {
            Some(path) => get_path(&result, path).cloned().unwrap_or(Value::Null),
            None => result,
        };

        if let Some(defaults) = &self.default_values {
            for (path, default) in defaults {
                let missing = get_path(&value, path).map(Value::is_null).unwrap_or(true);
                if missing {
                    set_path(&mut value, path, default.clone());
                }
            }
        }

        value
    }
}
