//! Entrance descriptors: one routable endpoint of a channel.
//!
//! A channel's `api.yaml` is a list of entrances:
//!
//! ```yaml
//! - name: query-orders
//!   router:
//!     - { method: GET, path: orders }
//!   authentication:
//!     - type: capability
//!       user: { roles: admin }
//!   payload:
//!     - { key: page, type: integer, default: 1 }
//!   socket_proxy:
//!     msgtype: 1001
//!     request_type: QueryOrders
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::auth::predicate::Predicate;
use crate::auth::signature::SignOptions;
use crate::channel::whitelist::Whitelist;
use crate::channel::setting::SocketSettings;
use crate::core::error::{GatewayError, GatewayResult};
use crate::transform::{FieldSpec, ParseOptions};

/// Method and path label an entrance answers to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub method: String,

    /// Path label; absent for the channel root
    #[serde(default)]
    pub path: Option<String>,
}

impl RouteRule {
    /// Exact, case-insensitive method match and exact label match
    pub fn matches(&self, method: &str, label: Option<&str>) -> bool {
        let label = label.filter(|l| !l.is_empty());
        self.method.eq_ignore_ascii_case(method) && self.path.as_deref().filter(|p| !p.is_empty()) == label
    }
}

/// One authentication requirement, evaluated in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authentication {
    /// Identity must satisfy the predicate
    #[serde(alias = "apikey")]
    Capability {
        #[serde(default)]
        user: Predicate,
    },

    /// Payload must carry a valid digest
    #[serde(alias = "sign")]
    Signature { sign: SignOptions },
}

/// Internal service call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub name: String,

    #[serde(default)]
    pub args: Vec<Value>,
}

/// Upstream HTTP request template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProxyTarget {
    pub method: String,
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Base query parameters; GET payloads are merged in
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Base body; non-GET payloads are merged in
    #[serde(default)]
    pub body: Map<String, Value>,
}

/// Server selection for a socket call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerTag {
    /// Key into the channel's server list
    Key(String),
    /// Inline connection settings
    Inline(SocketSettings),
}

/// Socket backend message description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketProxyTarget {
    pub msgtype: u32,

    #[serde(default, alias = "requestType")]
    pub request_type: Option<String>,

    #[serde(default, alias = "responseType")]
    pub response_type: Option<String>,

    #[serde(default, alias = "serverTag")]
    pub server_tag: Option<ServerTag>,
}

/// Exactly one dispatch backend per entrance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTarget {
    Service(ServiceTarget),
    HttpProxy(HttpProxyTarget),
    SocketProxy(SocketProxyTarget),
}

impl DispatchTarget {
    pub fn backend_name(&self) -> &'static str {
        match self {
            DispatchTarget::Service(_) => "service",
            DispatchTarget::HttpProxy(_) => "http",
            DispatchTarget::SocketProxy(_) => "socket",
        }
    }
}

/// Native output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NativeMode {
    /// Wrap structured results in the standard envelope
    #[default]
    Off,
    /// Return the backend's bytes as-is
    Raw,
    /// Return raw bytes, converting YAML upstream bodies to JSON
    Json,
}

impl NativeMode {
    pub fn is_native(self) -> bool {
        !matches!(self, NativeMode::Off)
    }
}

impl<'de> Deserialize<'de> for NativeMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Format(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(true) => Ok(NativeMode::Raw),
            Repr::Flag(false) => Ok(NativeMode::Off),
            Repr::Format(f) if f.eq_ignore_ascii_case("json") => Ok(NativeMode::Json),
            Repr::Format(other) => Err(serde::de::Error::custom(format!(
                "native must be a boolean or \"json\", got \"{}\"",
                other
            ))),
        }
    }
}

impl Serialize for NativeMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NativeMode::Off => serializer.serialize_bool(false),
            NativeMode::Raw => serializer.serialize_bool(true),
            NativeMode::Json => serializer.serialize_str("json"),
        }
    }
}

/// A routable endpoint of a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entrance {
    pub name: String,

    #[serde(default, alias = "router")]
    pub routes: Vec<RouteRule>,

    #[serde(default)]
    pub authentication: Vec<Authentication>,

    /// Payload schema; without one the input passes through unfiltered
    #[serde(default)]
    pub payload: Option<Vec<FieldSpec>>,

    /// `output key -> source path` mapping applied after validation
    #[serde(default)]
    pub props: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub native: Option<NativeMode>,

    #[serde(flatten)]
    pub target: DispatchTarget,

    #[serde(default)]
    pub parse: Option<ParseOptions>,

    #[serde(default)]
    pub whitelist: Whitelist,
}

impl Entrance {
    /// Native mode after backend defaults (HTTP proxies default to raw output)
    pub fn effective_native(&self) -> NativeMode {
        match (self.native, &self.target) {
            (Some(mode), _) => mode,
            (None, DispatchTarget::HttpProxy(_)) => NativeMode::Raw,
            (None, _) => NativeMode::Off,
        }
    }

    pub fn requires_signature(&self) -> bool {
        self.authentication
            .iter()
            .any(|a| matches!(a, Authentication::Signature { .. }))
    }

    /// Sanity checks run when a channel is loaded
    pub fn validate(&self) -> GatewayResult<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::config("entrance name cannot be empty"));
        }
        if self.routes.is_empty() {
            return Err(GatewayError::config(format!("entrance {} has no routes", self.name)));
        }
        let signatures = self
            .authentication
            .iter()
            .filter(|a| matches!(a, Authentication::Signature { .. }))
            .count();
        if signatures > 1 {
            return Err(GatewayError::config(format!(
                "entrance {} declares more than one signature requirement",
                self.name
            )));
        }
        Ok(())
    }
}
