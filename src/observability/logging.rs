//! # Structured Logging
//!
//! This module initialises the global `tracing` subscriber and provides the
//! sanitizer used whenever request payloads or socket messages are logged.
//!
//! ## Key Features
//! - JSON or human-readable output selected by configuration
//! - `RUST_LOG`-style directives layered on top of the configured level
//! - Redaction of signature, token and key values before payloads hit the log sink

use regex::Regex;
use serde_json::Value;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Initialize the tracing subscriber
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_logging(config: &LogConfig, service_name: &str) -> GatewayResult<()> {
    // Parse log level
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            return Err(GatewayError::config(format!("Invalid log level: {}", other)));
        }
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let initialized = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    // Try to initialize, but don't fail if already initialized
    if initialized.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    info!(service = %service_name, "Structured logging initialized");
    Ok(())
}

/// Sensitive data sanitizer
///
/// Matches `"field": "value"` and `"field": 123` pairs in serialized JSON and
/// replaces the value with `"[REDACTED]"`, keeping the key so the log line stays
/// readable.
#[derive(Debug, Clone)]
pub struct DataSanitizer {
    sensitive_patterns: Vec<Regex>,
    replacement: String,
}

impl DataSanitizer {
    pub fn new(sensitive_fields: &[String]) -> GatewayResult<Self> {
        let mut patterns = Vec::new();

        for field in sensitive_fields {
            let pattern = format!(
                r#"(?i)("{}"\s*:\s*)("[^"]*"|-?[0-9][0-9.eE+-]*)"#,
                regex::escape(field)
            );
            patterns.push(Regex::new(&pattern).map_err(|e| {
                GatewayError::internal(format!("Failed to compile regex pattern: {}", e))
            })?);
        }

        Ok(Self {
            sensitive_patterns: patterns,
            replacement: "\"[REDACTED]\"".to_string(),
        })
    }

    pub fn sanitize(&self, data: &str) -> String {
        let mut sanitized = data.to_string();

        for pattern in &self.sensitive_patterns {
            let replacement = format!("${{1}}{}", self.replacement);
            sanitized = pattern.replace_all(&sanitized, replacement.as_str()).to_string();
        }

        sanitized
    }

    /// Serialize a JSON value and sanitize it in one step
    pub fn sanitize_value(&self, value: &Value) -> String {
        self.sanitize(&value.to_string())
    }
}

impl Default for DataSanitizer {
    fn default() -> Self {
        let fields = LogConfig::default().sensitive_fields;
        // The default field list is plain identifiers, so compilation cannot fail.
        Self::new(&fields).unwrap_or(Self {
            sensitive_patterns: Vec::new(),
            replacement: "\"[REDACTED]\"".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitizer_redacts_values_and_keeps_keys() {
        let sanitizer = DataSanitizer::default();
        let payload = json!({ "a": 1, "sign": "abcdef", "token": 42 });

        let out = sanitizer.sanitize_value(&payload);
        assert!(out.contains(r#""sign":"[REDACTED]""#));
        assert!(out.contains(r#""token":"[REDACTED]""#));
        assert!(out.contains(r#""a":1"#));
        assert!(!out.contains("abcdef"));
    }

    #[test]
    fn test_sanitizer_custom_fields() {
        let sanitizer = DataSanitizer::new(&["appSecret".to_string()]).unwrap();
        let out = sanitizer.sanitize(r#"{"appSecret": "x1", "sign": "kept"}"#);
        assert!(out.contains(r#""appSecret": "[REDACTED]""#));
        assert!(out.contains("kept"));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LogConfig {
            level: "loud".to_string(),
            ..LogConfig::default()
        };
        assert!(init_logging(&config, "test").is_err());
    }
}
