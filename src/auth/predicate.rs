//! Capability predicates: a small query language over the identity document.
//!
//! ```yaml
//! user:
//!   roles: admin                 # membership, since roles is an array
//!   level: { $gte: 3 }
//!   team.name: { $in: [ops, sre] }
//!   email: { $regex: '@example\.com$' }
//! ```
//!
//! Every key must hold; an empty predicate matches any identity.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::transform::path::{get_path, scalar_to_string};

/// Query document evaluated against an identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate(pub Map<String, Value>);

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `doc` satisfies every condition
    pub fn matches(&self, doc: &Value) -> bool {
        self.0
            .iter()
            .all(|(path, condition)| check(get_path(doc, path), condition))
    }
}

fn check(target: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops
            .iter()
            .all(|(op, operand)| apply_operator(op, target, operand)),
        literal => target.map(|t| matches_literal(t, literal)).unwrap_or(false),
    }
}

fn apply_operator(op: &str, target: Option<&Value>, operand: &Value) -> bool {
    match op {
        "$eq" => target.map(|t| matches_literal(t, operand)).unwrap_or(false),
        "$ne" => !target.map(|t| matches_literal(t, operand)).unwrap_or(false),
        "$in" => target.map(|t| any_in(t, operand)).unwrap_or(false),
        "$nin" => !target.map(|t| any_in(t, operand)).unwrap_or(false),
        "$gt" => compare(target, operand).map(|o| o == Ordering::Greater).unwrap_or(false),
        "$gte" => compare(target, operand).map(|o| o != Ordering::Less).unwrap_or(false),
        "$lt" => compare(target, operand).map(|o| o == Ordering::Less).unwrap_or(false),
        "$lte" => compare(target, operand).map(|o| o != Ordering::Greater).unwrap_or(false),
        "$regex" => match (target, operand.as_str()) {
            (Some(t), Some(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(&scalar_to_string(t)))
                .unwrap_or(false),
            _ => false,
        },
        "$exists" => {
            let present = target.map(|t| !t.is_null()).unwrap_or(false);
            present == operand.as_bool().unwrap_or(true)
        }
        _ => false,
    }
}

/// Scalar equality with string/number leniency, or array membership
fn matches_literal(target: &Value, literal: &Value) -> bool {
    if target == literal {
        return true;
    }
    match target {
        Value::Array(items) if !literal.is_array() => items.iter().any(|item| loose_eq(item, literal)),
        _ => loose_eq(target, literal),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => a == b,
        (Value::Null, _) | (_, Value::Null) => a == b,
        _ => scalar_to_string(a) == scalar_to_string(b),
    }
}

fn any_in(target: &Value, operand: &Value) -> bool {
    let Some(candidates) = operand.as_array() else {
        return false;
    };
    match target {
        Value::Array(items) => items
            .iter()
            .any(|item| candidates.iter().any(|c| loose_eq(item, c))),
        _ => candidates.iter().any(|c| loose_eq(target, c)),
    }
}

fn compare(target: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let target = target?;
    match (as_number(target), as_number(operand)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (target.as_str(), operand.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn predicate(v: Value) -> Predicate {
        serde_json::from_value(v).unwrap()
    }

    fn user() -> Value {
        json!({
            "id": "42",
            "roles": ["editor", "admin"],
            "level": 3,
            "team": { "name": "ops" },
            "email": "a@example.com"
        })
    }

    #[test]
    fn test_empty_predicate_matches() {
        assert!(Predicate::default().matches(&user()));
    }

    #[test]
    fn test_literal_equality_and_membership() {
        assert!(predicate(json!({ "roles": "admin" })).matches(&user()));
        assert!(predicate(json!({ "id": 42 })).matches(&user()));
        assert!(!predicate(json!({ "roles": "owner" })).matches(&user()));
        assert!(!predicate(json!({ "missing": 1 })).matches(&user()));
    }

    #[test]
    fn test_operators() {
        let doc = user();
        assert!(predicate(json!({ "level": { "$gte": 3, "$lt": 5 } })).matches(&doc));
        assert!(!predicate(json!({ "level": { "$gt": 3 } })).matches(&doc));
        assert!(predicate(json!({ "team.name": { "$in": ["ops", "sre"] } })).matches(&doc));
        assert!(predicate(json!({ "roles": { "$nin": ["guest"] } })).matches(&doc));
        assert!(predicate(json!({ "email": { "$regex": "@example\\.com$" } })).matches(&doc));
        assert!(predicate(json!({ "team": { "$exists": true } })).matches(&doc));
        assert!(predicate(json!({ "nope": { "$exists": false } })).matches(&doc));
        assert!(predicate(json!({ "id": { "$ne": "7" } })).matches(&doc));
        assert!(!predicate(json!({ "id": { "$unknown": 1 } })).matches(&doc));
    }

    #[test]
    fn test_nested_object_literal_compares_whole_value() {
        assert!(predicate(json!({ "team": { "name": "ops" } })).matches(&user()));
        assert!(!predicate(json!({ "team": { "name": "dev" } })).matches(&user()));
    }
}
