//! # Request Signatures
//!
//! Signed requests carry a hex digest in a payload field (`sign` by default).
//! The gateway recomputes the digest over the assembled payload plus the
//! shared key and compares.
//!
//! ## Digest input
//! - With a `digest` template, `{path}` placeholders are resolved against the
//!   payload merged with `key` (`"{id}{ts}{key}"`)
//! - Without one, the canonical string is used: payload keys sorted
//!   ascending as `k=v` joined by `&`, skipping the signature field, the
//!   route tag and empty values, followed by `&key=<token>`

use md5::Md5;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::channel::setting::TimestampPolicy;
use crate::core::error::{GatewayError, GatewayResult};
use crate::transform::path::{get_path, scalar_to_string};
use crate::transform::TAG_KEY;

/// Digest algorithm for request signatures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Lowercase hex digest of `input`
    pub fn hex_digest(self, input: &str) -> String {
        match self {
            DigestAlgorithm::Md5 => hex::encode(Md5::digest(input.as_bytes())),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }
}

/// One candidate signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenOptions {
    pub key: String,

    #[serde(default)]
    pub name: String,

    /// Route tags this key is selected for
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Single shared key or a tagged key set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignToken {
    Single(String),
    Many(Vec<TokenOptions>),
}

/// Signature requirement options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignOptions {
    pub token: SignToken,

    /// Digest template; the canonical string is used when absent
    #[serde(default, alias = "md5")]
    pub digest: Option<String>,

    #[serde(default)]
    pub algorithm: DigestAlgorithm,

    /// Payload field carrying the signature
    #[serde(default = "default_sign_field")]
    pub field: String,

    /// Skip verification entirely
    #[serde(default)]
    pub debug: bool,
}

pub fn default_sign_field() -> String {
    "sign".to_string()
}

/// Principal name for a key without a name: a short digest of the key itself
fn unnamed_signer(key: &str) -> String {
    let digest = DigestAlgorithm::Sha256.hex_digest(key);
    format!("key-{}", &digest[..12])
}

impl SignOptions {
    /// Key to verify with: tagged requests pick the key carrying that tag,
    /// untagged requests take the first key
    pub fn select_token(&self, tag: Option<&str>) -> Option<(&str, String)> {
        match &self.token {
            SignToken::Single(key) => Some((key.as_str(), unnamed_signer(key))),
            SignToken::Many(tokens) => {
                let token = match tag {
                    Some(tag) => tokens.iter().find(|t| t.tags.iter().any(|x| x == tag)),
                    None => tokens.first(),
                }?;
                let name = if token.name.is_empty() {
                    unnamed_signer(&token.key)
                } else {
                    token.name.clone()
                };
                Some((token.key.as_str(), name))
            }
        }
    }

    /// Digest of `payload` signed with `key`
    pub fn sign(&self, payload: &Map<String, Value>, key: &str) -> String {
        let input = match &self.digest {
            Some(template) => {
                let mut doc = payload.clone();
                doc.insert("key".to_string(), Value::String(key.to_string()));
                render_template(template, &Value::Object(doc))
            }
            None => canonical_string(payload, &self.field, key),
        };
        self.algorithm.hex_digest(&input)
    }

    /// Verify the payload's signature; returns the signer's name
    pub fn verify(&self, payload: &Map<String, Value>, tag: Option<&str>) -> GatewayResult<String> {
        let (key, name) = self.select_token(tag).ok_or(GatewayError::SignatureMismatch)?;
        let presented = payload
            .get(&self.field)
            .map(scalar_to_string)
            .unwrap_or_default();
        if presented.is_empty() {
            return Err(GatewayError::SignatureMismatch);
        }

        let expected = self.sign(payload, key);
        if expected.eq_ignore_ascii_case(presented.trim()) {
            Ok(name)
        } else {
            Err(GatewayError::SignatureMismatch)
        }
    }
}

/// `k=v&...&key=<token>` over the sorted payload keys
pub fn canonical_string(payload: &Map<String, Value>, sign_field: &str, key: &str) -> String {
    let mut keys: Vec<&String> = payload
        .keys()
        .filter(|k| k.as_str() != sign_field && k.as_str() != TAG_KEY)
        .collect();
    keys.sort();

    let mut parts: Vec<String> = keys
        .into_iter()
        .filter_map(|k| {
            let value = scalar_to_string(&payload[k.as_str()]);
            (!value.is_empty()).then(|| format!("{}={}", k, value))
        })
        .collect();
    parts.push(format!("key={}", key));
    parts.join("&")
}

/// Replace `{path}` placeholders with values from `doc`; unknown paths render empty
pub fn render_template(template: &str, doc: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let path = after[..end].trim();
                if let Some(value) = get_path(doc, path) {
                    out.push_str(&scalar_to_string(value));
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Enforce the timestamp freshness policy
///
/// Unparseable or negative timestamps count as 0 and therefore fail as too old.
pub fn check_timestamp(
    payload: &Map<String, Value>,
    policy: &TimestampPolicy,
    now_ms: i64,
) -> GatewayResult<()> {
    let raw = get_path(&Value::Object(payload.clone()), &policy.field)
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|f| f.is_finite() && *f >= 0.0)
        .unwrap_or(0.0);

    if raw > now_ms as f64 {
        return Err(GatewayError::timestamp("timestamp is in the future"));
    }
    let age = now_ms.checked_sub(raw as i64).unwrap_or(i64::MAX);
    if age > i64::try_from(policy.timeout).unwrap_or(i64::MAX) {
        return Err(GatewayError::timestamp(format!(
            "timestamp is older than {}ms",
            policy.timeout
        )));
    }
    Ok(())
}
