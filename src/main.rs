//! # Channel Gateway - Main Entry Point
//!
//! Loads the gateway configuration, wires the channel store, authentication,
//! dispatch backends and task engine together, and serves until SIGTERM or
//! SIGINT. SIGHUP drops every channel snapshot so the next request reloads
//! channel files from disk.
//!
//! ## Startup sequence
//! 1. Configuration (`GATEWAY_CONFIG_PATH`, default `config/gateway.yaml`)
//! 2. Logging and the Prometheus recorder
//! 3. Channel store (plus file watcher when `channels.watch` is set)
//! 4. Identity provider, dispatcher and task engine
//! 5. Reconciliation of tasks left running by a previous process
//! 6. HTTP listener with graceful shutdown

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use channel_gateway::auth::{AuthPipeline, IdentityProvider, JwtIdentityProvider, StaticIdentityProvider};
use channel_gateway::channel::ChannelStore;
use channel_gateway::dispatch::{Dispatcher, ServiceRegistry};
use channel_gateway::gateway::{Gateway, GatewayServer, ServerState};
use channel_gateway::observability::{init_logging, DataSanitizer, GatewayMetrics};
use channel_gateway::task::TaskEngine;
use channel_gateway::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "config/gateway.yaml".to_string());
    let config = load_config(&config_path).await?;

    init_logging(&config.observability.logging, "channel-gateway").context("Failed to initialise logging")?;
    info!("🚀 Starting Channel Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from {}", config_path);

    let metrics = if config.observability.metrics_enabled {
        let metrics = GatewayMetrics::install().context("Failed to install metrics recorder")?;
        info!("📊 Prometheus metrics enabled at /metrics");
        Some(metrics)
    } else {
        None
    };

    let channels = Arc::new(ChannelStore::new(&config.channels.dir));
    if config.channels.watch {
        channels.watch().context("Failed to watch channel directory")?;
        info!("👀 Watching {} for channel changes", config.channels.dir.display());
    }

    let identity: Arc<dyn IdentityProvider> = match config.auth.jwt_secret {
        Some(_) => Arc::new(JwtIdentityProvider::from_config(&config.auth).context("Invalid auth configuration")?),
        None => {
            warn!("⚠️  No auth.jwt_secret configured; capability entrances will reject every request");
            Arc::new(StaticIdentityProvider::anonymous())
        }
    };

    let sanitizer = Arc::new(
        DataSanitizer::new(&config.observability.logging.sensitive_fields)
            .context("Invalid observability.logging.sensitive_fields")?,
    );
    let dispatcher = Dispatcher::new(
        config.server.upstream_timeout,
        Arc::new(ServiceRegistry::with_builtins()),
    )
    .context("Failed to build upstream HTTP client")?
    .with_sanitizer(sanitizer);

    let tasks = TaskEngine::new(&config.tasks.dir, config.tasks.site_host.clone(), dispatcher.clone());
    if config.tasks.reconcile_on_start {
        let reconciled = tasks.reconcile().await.context("Failed to reconcile tasks")?;
        if reconciled > 0 {
            warn!("🧹 Finished {} task(s) interrupted by the previous shutdown", reconciled);
        }
    }

    let gateway = Gateway::new(Arc::clone(&channels), AuthPipeline::new(identity), dispatcher, tasks);
    let server = GatewayServer::new(
        config.server.clone(),
        ServerState {
            gateway,
            workspace_root: config.tasks.workspace_root.clone(),
            privileged_role: config.auth.privileged_role.clone(),
            metrics,
        },
    );

    spawn_reload_handler(Arc::clone(&channels));

    server
        .start(shutdown_signal())
        .await
        .context("Gateway server failed")?;

    info!("✅ Channel Gateway shutdown complete");
    Ok(())
}

/// Configuration file when present, defaults otherwise
async fn load_config(path: &str) -> anyhow::Result<GatewayConfig> {
    if Path::new(path).exists() {
        return GatewayConfig::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path));
    }

    let mut config = GatewayConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// SIGHUP drops every channel snapshot
fn spawn_reload_handler(channels: Arc<ChannelStore>) {
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("📡 Received SIGHUP, reloading channel configuration");
            channels.reload();
        }
    });
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            error!("Failed to install shutdown signal handlers; falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("📡 Received SIGTERM, initiating graceful shutdown...");
        }
        _ = sigint.recv() => {
            info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
    }
}
