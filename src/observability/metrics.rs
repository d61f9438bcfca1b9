//! # Metrics Collection
//!
//! Counters and histograms for proxied requests, dispatch backends and the task
//! engine, exported in Prometheus text format.
//!
//! ## Usage Example
//! ```rust,ignore
//! let metrics = GatewayMetrics::install()?;
//! GatewayMetrics::record_request("billing", "query", 200, started.elapsed());
//! let text = metrics.render();
//! ```

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// Handle to the installed Prometheus recorder
#[derive(Clone)]
pub struct GatewayMetrics {
    handle: PrometheusHandle,
}

impl GatewayMetrics {
    /// Install the global Prometheus recorder
    pub fn install() -> GatewayResult<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::internal(format!("Failed to install metrics recorder: {}", e)))?;
        Ok(Self { handle })
    }

    /// Render the current metrics in Prometheus exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Record one proxied request
    ///
    /// Free functions on the global recorder are no-ops when nothing is installed,
    /// so these helpers are safe to call from tests.
    pub fn record_request(channel: &str, label: &str, status: u16, elapsed: Duration) {
        metrics::counter!(
            "gateway_requests_total",
            "channel" => channel.to_string(),
            "label" => label.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        metrics::histogram!(
            "gateway_request_duration_seconds",
            "channel" => channel.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    /// Record the outcome of one dispatch backend call
    pub fn record_dispatch(backend: &'static str, ok: bool) {
        metrics::counter!(
            "gateway_dispatch_total",
            "backend" => backend,
            "outcome" => if ok { "ok" } else { "error" }
        )
        .increment(1);
    }

    /// Record a task lifecycle transition
    pub fn record_task(kind: &'static str, event: &'static str) {
        metrics::counter!("gateway_tasks_total", "kind" => kind, "event" => event).increment(1);
    }
}
