//! Per-channel runtime settings (`setting.yaml`).
//!
//! ```yaml
//! tcp_socket:
//!   host: 10.0.0.5
//!   port: 9100
//!   timeout: 30s
//!   codec: protobuf
//! server:
//!   - { key: s1, host: 10.0.0.6, port: 9100 }
//! whitelist:
//!   - '^10\.'
//! signuser:
//!   timestamp: { field: ts, timeout: 60000 }
//!   openapi:
//!     - name: query-orders
//!       valid: '{id}{ts}{key}'
//!   user:
//!     - { id: 1001, name: partner, token: s3cret, openapi: [query-orders] }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::channel::whitelist::Whitelist;
use crate::socket::message::CodecKind;
use crate::transform::FieldSpec;

/// Connection parameters for the socket proxy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocketSettings {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Idle timeout (defaults to 50s)
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub codec: CodecKind,
}

impl SocketSettings {
    /// Overlay `other` on top of `self`; populated fields in `other` win
    pub fn merged_with(&self, other: &SocketSettings) -> SocketSettings {
        SocketSettings {
            host: other.host.clone().or_else(|| self.host.clone()),
            port: other.port.or(self.port),
            timeout: other.timeout.or(self.timeout),
            codec: if other.codec != CodecKind::default() {
                other.codec
            } else {
                self.codec
            },
        }
    }
}

/// Socket backend addressable by key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub key: String,
    pub host: String,
    pub port: u16,
}

/// Timestamp freshness policy for signed requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampPolicy {
    /// Payload field holding the timestamp in milliseconds
    pub field: String,

    /// Maximum age in milliseconds
    #[serde(default = "default_timestamp_timeout")]
    pub timeout: u64,
}

fn default_timestamp_timeout() -> u64 {
    1000
}

/// Open API a signing user may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignApi {
    /// Entrance name
    pub name: String,

    /// Digest template
    #[serde(default)]
    pub valid: Option<String>,

    /// Extra payload fields accepted for signing users
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// `body path -> optional-set name` restrictions
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

/// Registered signing user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUser {
    /// Matched against the request's tag segment
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    pub name: String,

    pub token: String,

    /// Allowed values per restriction set
    #[serde(default)]
    pub optional: BTreeMap<String, Vec<Value>>,

    /// Entrance names this user may call
    #[serde(default)]
    pub openapi: Vec<String>,
}

/// Signing-user registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUserRegistry {
    #[serde(default)]
    pub openapi: Vec<SignApi>,

    #[serde(default, alias = "users")]
    pub user: Vec<SignUser>,

    #[serde(default)]
    pub timestamp: Option<TimestampPolicy>,
}

impl SignUserRegistry {
    /// User registered under `tag` who may call `entrance`
    pub fn user_for(&self, tag: &str, entrance: &str) -> Option<&SignUser> {
        self.user
            .iter()
            .find(|u| u.id == tag && u.openapi.iter().any(|name| name == entrance))
    }

    pub fn api(&self, entrance: &str) -> Option<&SignApi> {
        self.openapi.iter().find(|api| api.name == entrance)
    }
}

/// Per-channel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSetting {
    #[serde(default, alias = "tcpSocket")]
    pub tcp_socket: Option<SocketSettings>,

    #[serde(default)]
    pub server: Vec<ServerEntry>,

    #[serde(default, alias = "signuserOpts")]
    pub signuser: Option<SignUserRegistry>,

    /// Caller address patterns (regular expressions)
    #[serde(default)]
    pub whitelist: Whitelist,
}

impl ChannelSetting {
    pub fn server(&self, key: &str) -> Option<&ServerEntry> {
        self.server.iter().find(|s| s.key == key)
    }

    /// Replace the server list; a `slave` entry becomes the default socket host
    pub fn apply_server_list(&mut self, servers: Vec<ServerEntry>) {
        self.server = servers;
        if let Some(socket) = self.tcp_socket.as_mut() {
            if let Some(slave) = self.server.iter().find(|s| s.key == "slave") {
                socket.host = Some(slave.host.clone());
                socket.port = Some(slave.port);
            }
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
