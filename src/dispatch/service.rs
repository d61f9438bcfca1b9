//! # Service Registry
//!
//! Internal-service entrances call functions compiled into the gateway. Each
//! function implements [`ChannelService`] and is registered by name, either
//! globally or for a single channel; channel registrations shadow global ones.
//!
//! ```rust,ignore
//! let registry = ServiceRegistry::with_builtins();
//! registry.register_for("billing", "invoice", Arc::new(InvoiceService::new(db)));
//! registry.register_fn("now", |_args, _ctx| Ok(json!(chrono::Utc::now().timestamp())));
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Principal;

/// What a service sees of the request
pub struct ServiceContext<'a> {
    pub channel: &'a str,
    pub payload: &'a Map<String, Value>,
    pub principal: Option<&'a Principal>,
}

/// A named function callable from an entrance
#[async_trait]
pub trait ChannelService: Send + Sync {
    async fn call(&self, args: &[Value], ctx: &ServiceContext<'_>) -> GatewayResult<Value>;
}

/// Adapter turning a synchronous closure into a service
pub struct FnService<F>(F);

#[async_trait]
impl<F> ChannelService for FnService<F>
where
    F: Fn(&[Value], &ServiceContext<'_>) -> GatewayResult<Value> + Send + Sync,
{
    async fn call(&self, args: &[Value], ctx: &ServiceContext<'_>) -> GatewayResult<Value> {
        (self.0)(args, ctx)
    }
}

/// Returns its arguments and payload unchanged
pub struct EchoService;

#[async_trait]
impl ChannelService for EchoService {
    async fn call(&self, args: &[Value], ctx: &ServiceContext<'_>) -> GatewayResult<Value> {
        Ok(json!({
            "args": args,
            "payload": ctx.payload,
        }))
    }
}

/// Name-to-service table
#[derive(Default)]
pub struct ServiceRegistry {
    global: DashMap<String, Arc<dyn ChannelService>>,
    scoped: DashMap<(String, String), Arc<dyn ChannelService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `echo` service
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("echo", Arc::new(EchoService));
        registry
    }

    pub fn register(&self, name: &str, service: Arc<dyn ChannelService>) {
        self.global.insert(name.to_string(), service);
    }

    pub fn register_for(&self, channel: &str, name: &str, service: Arc<dyn ChannelService>) {
        self.scoped
            .insert((channel.to_string(), name.to_string()), service);
    }

    pub fn register_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value], &ServiceContext<'_>) -> GatewayResult<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnService(f)));
    }

    pub fn register_fn_for<F>(&self, channel: &str, name: &str, f: F)
    where
        F: Fn(&[Value], &ServiceContext<'_>) -> GatewayResult<Value> + Send + Sync + 'static,
    {
        self.register_for(channel, name, Arc::new(FnService(f)));
    }

    pub fn get(&self, channel: &str, name: &str) -> Option<Arc<dyn ChannelService>> {
        self.scoped
            .get(&(channel.to_string(), name.to_string()))
            .map(|s| Arc::clone(s.value()))
            .or_else(|| self.global.get(name).map(|s| Arc::clone(s.value())))
    }

    /// Look up and invoke a service
    pub async fn call(&self, name: &str, args: &[Value], ctx: &ServiceContext<'_>) -> GatewayResult<Value> {
        let service = self
            .get(ctx.channel, name)
            .ok_or_else(|| GatewayError::not_found(format!("service {}", name)))?;
        service.call(args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(channel: &'a str, payload: &'a Map<String, Value>) -> ServiceContext<'a> {
        ServiceContext {
            channel,
            payload,
            principal: None,
        }
    }

    #[tokio::test]
    async fn test_echo_builtin() {
        let registry = ServiceRegistry::with_builtins();
        let payload = json!({ "a": 1 }).as_object().unwrap().clone();
        let out = registry.call("echo", &[json!("x")], &ctx("any", &payload)).await.unwrap();
        assert_eq!(out, json!({ "args": ["x"], "payload": { "a": 1 } }));
    }

    #[tokio::test]
    async fn test_channel_registration_shadows_global() {
        let registry = ServiceRegistry::new();
        registry.register_fn("who", |_, _| Ok(json!("global")));
        registry.register_fn_for("beta", "who", |_, _| Ok(json!("beta")));

        let payload = Map::new();
        assert_eq!(registry.call("who", &[], &ctx("alpha", &payload)).await.unwrap(), json!("global"));
        assert_eq!(registry.call("who", &[], &ctx("beta", &payload)).await.unwrap(), json!("beta"));
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let registry = ServiceRegistry::new();
        let payload = Map::new();
        let err = registry.call("nope", &[], &ctx("alpha", &payload)).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }
}
