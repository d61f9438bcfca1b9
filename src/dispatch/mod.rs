//! # Dispatch Backends
//!
//! Fulfils a resolved entrance with one of three strategies:
//!
//! - [`service`]: a function from the [`ServiceRegistry`]
//! - [`http`]: an upstream HTTP request
//! - [`socket`]: one framed exchange with a TCP backend
//!
//! ## Result shaping
//! Every backend produces a [`BackendResult`]. The dispatcher then applies the
//! entrance's `parse` options, and decides once whether the caller receives a
//! structured value (wrapped in the standard envelope by the HTTP layer) or
//! raw bytes with a content type (`native` entrances).

pub mod http;
pub mod service;
pub mod socket;

use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::channel::{Channel, DispatchTarget, Entrance, NativeMode};
use crate::core::error::GatewayResult;
use crate::core::types::{DispatchOutput, Principal};
use crate::observability::{DataSanitizer, GatewayMetrics};

pub use http::HttpBackend;
pub use service::{ChannelService, EchoService, FnService, ServiceContext, ServiceRegistry};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// What a backend returned, before result shaping
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResult {
    /// Structured value (services and socket backends)
    Value(Value),
    /// Upstream body with its content type (HTTP backends)
    Text { body: Bytes, content_type: String },
}

impl BackendResult {
    /// Structured view: JSON, then YAML, then the body as a string
    pub fn into_value(self) -> Value {
        match self {
            BackendResult::Value(value) => value,
            BackendResult::Text { body, .. } => parse_document(&body),
        }
    }
}

fn parse_document(body: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        return value;
    }
    match serde_yaml::from_slice::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(String::from_utf8_lossy(body).into_owned()),
    }
}

/// Runs dispatch backends and shapes their results
#[derive(Clone)]
pub struct Dispatcher {
    http: HttpBackend,
    services: Arc<ServiceRegistry>,
    sanitizer: Arc<DataSanitizer>,
}

impl Dispatcher {
    pub fn new(upstream_timeout: Duration, services: Arc<ServiceRegistry>) -> GatewayResult<Self> {
        Ok(Self {
            http: HttpBackend::new(upstream_timeout)?,
            services,
            sanitizer: Arc::new(DataSanitizer::default()),
        })
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<DataSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Run the entrance's backend and shape the result
    pub async fn dispatch(
        &self,
        channel: &Channel,
        entrance: &Entrance,
        payload: &Map<String, Value>,
        principal: Option<&Principal>,
    ) -> GatewayResult<DispatchOutput> {
        let backend = entrance.target.backend_name();
        let ctx = ServiceContext {
            channel: &channel.name,
            payload,
            principal,
        };

        let result = self.call_backend(channel, entrance, payload, &ctx).await;
        GatewayMetrics::record_dispatch(backend, result.is_ok());
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    channel = %channel.name,
                    entrance = %entrance.name,
                    backend,
                    error = %e,
                    "Dispatch failed"
                );
                return Err(e);
            }
        };

        let result = match &entrance.parse {
            Some(parse) => {
                let mut value = parse.apply(result.into_value());
                if let Some(exec) = &parse.exec {
                    debug!(service = %exec, "Running result transform");
                    value = self.services.call(exec, &[value], &ctx).await?;
                }
                BackendResult::Value(value)
            }
            None => result,
        };

        Ok(shape_output(result, entrance.effective_native()))
    }

    async fn call_backend(
        &self,
        channel: &Channel,
        entrance: &Entrance,
        payload: &Map<String, Value>,
        ctx: &ServiceContext<'_>,
    ) -> GatewayResult<BackendResult> {
        let sanitized = self.sanitizer.sanitize_value(&Value::Object(payload.clone()));
        debug!(
            channel = %channel.name,
            entrance = %entrance.name,
            backend = entrance.target.backend_name(),
            payload = %sanitized,
            "Dispatching"
        );

        match &entrance.target {
            DispatchTarget::Service(target) => self
                .services
                .call(&target.name, &target.args, ctx)
                .await
                .map(BackendResult::Value),
            DispatchTarget::HttpProxy(target) => {
                self.http.send(target, payload, entrance.effective_native()).await
            }
            DispatchTarget::SocketProxy(target) => {
                socket::send(&channel.setting, target, payload, Arc::clone(&self.sanitizer))
                    .await
                    .map(BackendResult::Value)
            }
        }
    }
}

/// Decide between enveloped and raw output
fn shape_output(result: BackendResult, native: NativeMode) -> DispatchOutput {
    if !native.is_native() {
        return DispatchOutput::Structured(result.into_value());
    }

    match result {
        BackendResult::Text { body, content_type } => DispatchOutput::Raw { body, content_type },
        BackendResult::Value(Value::String(text)) => DispatchOutput::raw(text, TEXT_CONTENT_TYPE),
        BackendResult::Value(value @ (Value::Object(_) | Value::Array(_))) => {
            match serde_json::to_vec_pretty(&value) {
                Ok(body) => DispatchOutput::raw(body, JSON_CONTENT_TYPE),
                Err(_) => DispatchOutput::Structured(value),
            }
        }
        BackendResult::Value(Value::Null) => DispatchOutput::raw(Bytes::new(), TEXT_CONTENT_TYPE),
        BackendResult::Value(scalar) => DispatchOutput::raw(scalar.to_string(), TEXT_CONTENT_TYPE),
    }
}
