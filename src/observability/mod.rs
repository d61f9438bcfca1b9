// Core observability configuration
pub mod config;

// Metrics collection
pub mod metrics;

// Structured logging
pub mod logging;

// Re-export commonly used types for convenience
pub use config::{LogConfig, LogFormat, ObservabilityConfig};
pub use logging::{init_logging, DataSanitizer};
pub use metrics::GatewayMetrics;
