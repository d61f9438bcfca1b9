//! # Core Types Module
//!
//! Data structures shared by the resolver, the authentication pipeline, the
//! dispatch backends and the task engine.
//!
//! ## Rust Ownership Concepts in This Module
//!
//! - Request context is borrowed (`&RequestContext`) by every stage; only the
//!   task engine clones it, because a background job outlives the request
//! - `Bytes` lets raw upstream bodies move through the gateway without copying

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Caller identity produced by an [`IdentityProvider`](crate::auth::IdentityProvider)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Additional claims carried by the credential
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Identity {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// JSON document capability predicates are evaluated against
    ///
    /// Claims are flattened into the top level; `id`, `name` and `roles`
    /// always win over a claim of the same name.
    pub fn as_value(&self) -> Value {
        let mut doc = self.claims.clone();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        doc.insert("name".to_string(), Value::String(self.name.clone()));
        doc.insert(
            "roles".to_string(),
            Value::Array(self.roles.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(doc)
    }
}

/// Who a request was authenticated as
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// Identity resolved by the identity provider
    User(Identity),
    /// Name of the token a signature was verified with
    Signer(String),
}

impl Principal {
    /// Owner id recorded on tasks started by this principal
    ///
    /// Prefixed by principal kind so a user id never collides with a signer name.
    pub fn owner_id(&self) -> String {
        match self {
            Principal::User(identity) => format!("user:{}", identity.id),
            Principal::Signer(name) => format!("signer:{}", name),
        }
    }
}

/// Everything about an inbound gateway request that the pipeline needs
///
/// Captured once at the HTTP boundary so that background exports can replay
/// the dispatch without the original request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub channel: String,
    pub label: Option<String>,
    pub tag: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub headers: HeaderMap,
    /// Query parameters for GET, parsed body otherwise
    pub input: Value,
}

impl RequestContext {
    pub fn new<C: Into<String>>(method: Method, channel: C) -> Self {
        Self {
            method,
            channel: channel.into(),
            label: None,
            tag: None,
            client_ip: None,
            headers: HeaderMap::new(),
            input: Value::Object(Map::new()),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Label used in logs and metrics
    pub fn label_or_root(&self) -> &str {
        self.label.as_deref().unwrap_or("/")
    }
}

/// Result of a dispatch
///
/// Decided once by the backend: structured values are wrapped in the standard
/// envelope, raw output is returned as-is with its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutput {
    Structured(Value),
    Raw { body: Bytes, content_type: String },
}

impl DispatchOutput {
    pub fn raw<B: Into<Bytes>, C: Into<String>>(body: B, content_type: C) -> Self {
        Self::Raw {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    /// Structured view of the output, parsing raw JSON bodies when possible
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Raw { body, .. } => serde_json::from_slice(body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())),
        }
    }
}

/// Standard success envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_document() {
        let mut identity = Identity::new("u1", "alice").with_roles(&["admin"]);
        identity.claims.insert("group".to_string(), json!(3));
        identity.claims.insert("id".to_string(), json!("spoofed"));

        let doc = identity.as_value();
        assert_eq!(doc["id"], json!("u1"));
        assert_eq!(doc["group"], json!(3));
        assert_eq!(doc["roles"], json!(["admin"]));
        assert!(identity.has_role("admin"));
    }

    #[test]
    fn test_raw_output_to_value() {
        let out = DispatchOutput::raw(r#"{"a":1}"#, "application/json");
        assert_eq!(out.to_value(), json!({ "a": 1 }));

        let out = DispatchOutput::raw("plain", "text/plain");
        assert_eq!(out.to_value(), json!("plain"));
    }

    #[test]
    fn test_principal_owner() {
        assert_eq!(Principal::Signer("partner".into()).owner_id(), "signer:partner");
        assert_eq!(Principal::User(Identity::new("7", "x")).owner_id(), "user:7");
        assert_ne!(
            Principal::Signer("7".into()).owner_id(),
            Principal::User(Identity::new("7", "x")).owner_id()
        );
    }
}
