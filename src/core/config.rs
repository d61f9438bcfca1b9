//! # Configuration Module
//!
//! Process-level configuration for the gateway: where channel definitions live,
//! where task state is written, how the HTTP listener is bound and how logging
//! is initialised. Channel definitions themselves are loaded per channel by
//! [`crate::channel::ChannelStore`].
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support (`GATEWAY_<SECTION>_<FIELD>`)
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{LogFormat, ObservabilityConfig};

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Channel definition directory
    pub channels: ChannelsConfig,

    /// Task engine settings
    pub tasks: TasksConfig,

    /// Identity collaborator settings
    pub auth: AuthConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension)
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?
        };

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// For example: `GATEWAY_SERVER_PORT=8080`, `GATEWAY_TASKS_DIR=/var/lib/gateway/tasks`
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(timeout) = env::var("GATEWAY_SERVER_UPSTREAM_TIMEOUT") {
            self.server.upstream_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SERVER_UPSTREAM_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(dir) = env::var("GATEWAY_CHANNELS_DIR") {
            self.channels.dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var("GATEWAY_TASKS_DIR") {
            self.tasks.dir = PathBuf::from(dir);
        }

        if let Ok(host) = env::var("GATEWAY_SITE_HOST") {
            self.tasks.site_host = host;
        }

        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(enabled) = env::var("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics_enabled = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_METRICS_ENABLED: {}", e)))?;
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        } else if self.server.socket_addr().is_err() {
            errors.push(format!(
                "server.bind_address '{}' is not a valid IP address",
                self.server.bind_address
            ));
        }

        if !self.server.proxy_prefix.is_empty() && !self.server.proxy_prefix.starts_with('/') {
            errors.push("server.proxy_prefix must start with '/'".to_string());
        }

        if self.server.max_request_size == 0 {
            errors.push("server.max_request_size must be greater than 0".to_string());
        }

        if self.server.upstream_timeout.is_zero() {
            errors.push("server.upstream_timeout must be greater than 0".to_string());
        }

        if self.channels.dir.as_os_str().is_empty() {
            errors.push("channels.dir cannot be empty".to_string());
        }

        if self.tasks.dir.as_os_str().is_empty() {
            errors.push("tasks.dir cannot be empty".to_string());
        }

        if let Some(secret) = &self.auth.jwt_secret {
            if secret.is_empty() {
                errors.push("auth.jwt_secret cannot be empty when set".to_string());
            }
        }

        match self.auth.jwt_algorithm.to_uppercase().as_str() {
            "HS256" | "HS384" | "HS512" => {}
            other => errors.push(format!("Unsupported auth.jwt_algorithm: {}", other)),
        }

        match self.observability.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!(
                "Invalid log level: {}",
                self.observability.logging.level
            )),
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (IP literal)
    pub bind_address: String,

    /// Listener port
    pub port: u16,

    /// Path prefix for the channel proxy routes ("" mounts them at the root)
    pub proxy_prefix: String,

    /// Maximum request body size in bytes
    pub max_request_size: usize,

    /// Timeout applied by the upstream HTTP client
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Attach a permissive CORS layer
    pub enable_cors: bool,
}

impl ServerConfig {
    /// Parse the bind address and port into a socket address
    pub fn socket_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 4000,
            proxy_prefix: String::new(),
            max_request_size: 10 * 1024 * 1024, // 10MB
            upstream_timeout: Duration::from_secs(30),
            enable_cors: true,
        }
    }
}

/// Channel definition directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Root directory; each channel is a sub-directory
    pub dir: PathBuf,

    /// Reload channel snapshots when files under `dir` change
    pub watch: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("channels"),
            watch: false,
        }
    }
}

/// Task engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Directory holding one sub-directory per task
    pub dir: PathBuf,

    /// Public origin used to build download URLs for exported results
    pub site_host: String,

    /// Root that archive/extract paths submitted over HTTP are resolved against
    pub workspace_root: PathBuf,

    /// Finish tasks left `running` by a previous process on startup
    pub reconcile_on_start: bool,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tasks"),
            site_host: "http://localhost:4000".to_string(),
            workspace_root: PathBuf::from("storage"),
            reconcile_on_start: true,
        }
    }
}

/// Identity collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for bearer JWT validation; no identities are resolved when unset
    pub jwt_secret: Option<String>,

    /// HMAC algorithm name (HS256, HS384, HS512)
    pub jwt_algorithm: String,

    /// Role that may see and delete every user's tasks
    pub privileged_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
            privileged_role: "admin".to_string(),
        }
    }
}
