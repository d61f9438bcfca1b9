//! # Channel Gateway Library
//!
//! A gateway that fronts per-channel backend integrations. Each channel is a
//! directory of configuration: a route table of entrances, connection
//! settings and signing users. A request `METHOD /{channel}/{label}/{tag}`
//! is resolved to an entrance, authenticated, validated and dispatched to an
//! internal service, an upstream HTTP API or a length-prefixed socket server.
//! Long-running work (zip extraction, archiving, result exports) runs as
//! background tasks tracked on disk.
//!
//! ## Module Map
//! - [`core`]: errors, configuration, shared request/response types
//! - [`channel`]: channel configuration model and snapshot store
//! - [`routing`]: entrance resolution and signing-user overrides
//! - [`auth`]: whitelist, capability predicates, signatures, identity providers
//! - [`transform`]: payload schema, props mapping, result post-processing
//! - [`dispatch`]: internal services, HTTP proxy, socket proxy
//! - [`socket`]: frame codec, message codecs, socket client
//! - [`task`]: extract / archive / proxy-export jobs and their on-disk records
//! - [`gateway`]: request pipeline and the axum server
//! - [`observability`]: logging, sanitising and Prometheus metrics

pub mod auth;
pub mod channel;
pub mod core;
pub mod dispatch;
pub mod gateway;
pub mod observability;
pub mod routing;
pub mod socket;
pub mod task;
pub mod transform;

/// Main error type used throughout the gateway
pub use core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

pub use core::types::{DispatchOutput, Envelope, Identity, Principal, RequestContext};
pub use gateway::{Gateway, GatewayServer, ServerState};
