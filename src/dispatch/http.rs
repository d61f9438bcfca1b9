//! HTTP reverse-proxy backend.
//!
//! GET payloads merge into the query string, other methods merge into the
//! JSON body. A route tag becomes a trailing path segment. Upstream bodies
//! that parse as JSON are re-serialized pretty-printed; with `native: json`,
//! YAML documents are converted to JSON as well.

use bytes::Bytes;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::channel::{HttpProxyTarget, NativeMode};
use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatch::BackendResult;
use crate::transform::path::{deep_merge, scalar_to_string};
use crate::transform::TAG_KEY;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared upstream HTTP client
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Forward `payload` to the upstream described by `target`
    pub async fn send(
        &self,
        target: &HttpProxyTarget,
        payload: &Map<String, Value>,
        native: NativeMode,
    ) -> GatewayResult<BackendResult> {
        let method = parse_method(&target.method)?;
        let tag = payload.get(TAG_KEY).map(scalar_to_string);

        let mut forwarded = payload.clone();
        forwarded.remove(TAG_KEY);

        let mut params = target.params.clone();
        let mut body = target.body.clone();
        if method == Method::GET {
            deep_merge(&mut params, &forwarded);
        } else {
            deep_merge(&mut body, &forwarded);
        }

        let url = build_url(&target.url, tag.as_deref(), &params)?;
        debug!(method = %method, url = %url, "Forwarding to HTTP upstream");

        let mut request = self.client.request(method.clone(), url.clone());
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if method != Method::GET {
            request = request.json(&Value::Object(body));
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP upstream request failed");
            GatewayError::HttpProxy {
                code: transport_code(&e).to_string(),
                cause: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let code = if status.is_client_error() {
                "ERR_BAD_REQUEST"
            } else {
                "ERR_BAD_RESPONSE"
            };
            return Err(GatewayError::HttpProxy {
                code: code.to_string(),
                cause: format!("upstream returned {}", status),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let raw = response.bytes().await.map_err(|e| GatewayError::HttpProxy {
            code: transport_code(&e).to_string(),
            cause: e.to_string(),
        })?;

        Ok(normalize_body(raw, content_type, native))
    }
}

fn parse_method(method: &str) -> GatewayResult<Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" | "DOWNLOAD" => Ok(Method::GET),
        "POST" | "UPLOAD" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "PATCH" => Ok(Method::PATCH),
        other => Err(GatewayError::config(format!("Unsupported proxy method: {}", other))),
    }
}

/// Upstream URL with the tag segment appended and params merged over any
/// query the template already carries
fn build_url(base: &str, tag: Option<&str>, params: &Map<String, Value>) -> GatewayResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| GatewayError::config(format!("Invalid proxy url {}: {}", base, e)))?;

    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        let path = format!("{}/{}", url.path().trim_end_matches('/'), tag);
        url.set_path(&path);
    }

    if !params.is_empty() {
        let mut query: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !params.contains_key(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        for (key, value) in params {
            match value {
                Value::Array(items) => {
                    query.extend(items.iter().map(|item| (key.clone(), scalar_to_string(item))))
                }
                Value::Null => {}
                other => query.push((key.clone(), scalar_to_string(other))),
            }
        }
        url.query_pairs_mut().clear().extend_pairs(query);
    }

    Ok(url)
}

fn transport_code(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "ETIMEDOUT"
    } else if error.is_connect() {
        "ECONNREFUSED"
    } else if error.is_decode() || error.is_body() {
        "ERR_BAD_RESPONSE"
    } else {
        "ERR_NETWORK"
    }
}

/// Re-serialize JSON bodies, and YAML bodies too when JSON output is requested
fn normalize_body(raw: Bytes, content_type: String, native: NativeMode) -> BackendResult {
    if let Ok(value) = serde_json::from_slice::<Value>(&raw) {
        if let Ok(pretty) = serde_json::to_vec_pretty(&value) {
            return BackendResult::Text {
                body: Bytes::from(pretty),
                content_type,
            };
        }
    }

    if native == NativeMode::Json {
        if let Ok(value @ (Value::Object(_) | Value::Array(_))) = serde_yaml::from_slice::<Value>(&raw) {
            if let Ok(pretty) = serde_json::to_vec_pretty(&value) {
                return BackendResult::Text {
                    body: Bytes::from(pretty),
                    content_type: JSON_CONTENT_TYPE.to_string(),
                };
            }
        }
    }

    BackendResult::Text {
        body: raw,
        content_type,
    }
}
