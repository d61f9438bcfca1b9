//! # Gateway Module
//!
//! - [`proxy`]: the per-request pipeline, independent of HTTP types
//! - [`server`]: axum routes, handlers and the listener

pub mod proxy;
pub mod server;

pub use proxy::{Gateway, ProxyOptions, ProxyOutcome};
pub use server::{build_router, GatewayServer, ServerState};
