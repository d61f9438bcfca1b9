//! # Error Handling Module
//!
//! This module provides the error type used throughout the gateway, built with the
//! `thiserror` crate. Every variant carries a stable numeric code and maps to an
//! HTTP status so the boundary layer can turn failures into responses without
//! inspecting messages.
//!
//! ## Error Taxonomy
//! - configuration errors (missing parameter, invalid configuration file)
//! - validation errors (payload schema violations)
//! - authentication errors (unauthenticated, forbidden, signature, whitelist)
//! - upstream errors (HTTP proxy, socket timeout, socket transport)
//! - not-found (entrance, task, file)
//! - internal errors (I/O, serialization, archive handling)
//!
//! Task failures are never returned to a caller after the job has started; the
//! task engine records them inside the persisted task node instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Stable numeric error codes exposed in error responses
pub mod codes {
    /// Permission denied (forbidden capability or IP not whitelisted)
    pub const PERMISSION_DENIED: u32 = 1000;
    /// Signature digest mismatch
    pub const SIGNATURE_INVALID: u32 = 1001;
    /// Signature timestamp missing, in the future or too old
    pub const SIGNATURE_TIMESTAMP: u32 = 1002;
    /// No identity was presented for a capability entrance
    pub const UNAUTHENTICATED: u32 = 1003;
    /// A required configuration or request parameter is missing
    pub const MISSING_PARAMETER: u32 = 1004;
    /// Payload field failed validation
    pub const VALIDATION: u32 = 1005;
    /// Entrance, task or file not found
    pub const NOT_FOUND: u32 = 1006;
    /// Upstream HTTP transport failure
    pub const HTTP_PROXY: u32 = 1100;
    /// Socket response did not arrive before the idle timeout
    pub const SOCKET_TIMEOUT: u32 = 1101;
    /// Socket connect/read/write failure
    pub const SOCKET_TRANSPORT: u32 = 1102;
    /// Socket payload could not be encoded or decoded
    pub const SOCKET_CODEC: u32 = 1103;
    /// Input file is not a readable zip archive
    pub const NOT_ZIPFILE: u32 = 1200;
    /// Configuration file invalid
    pub const CONFIGURATION: u32 = 1300;
    /// Anything else
    pub const INTERNAL: u32 = 1500;
}

/// Error type for the gateway
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display` with the
/// message shown to clients.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A required configuration or request parameter is missing
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    /// Payload field failed schema validation
    #[error("{message}")]
    Validation {
        field: String,
        message: String,
        code: u32,
    },

    /// No identity was available for a capability-authenticated entrance
    #[error("Unauthorized")]
    Unauthenticated,

    /// Identity resolved but the capability predicate rejected it
    #[error("Permission denied: {reason}")]
    Forbidden { reason: String },

    /// Caller address matches no whitelist pattern
    #[error("Permission denied: address {address} is not whitelisted")]
    IpNotWhitelisted { address: String },

    /// Recomputed digest does not match the presented signature
    #[error("Signature verification failed")]
    SignatureMismatch,

    /// Signature timestamp is missing, in the future or older than the allowed skew
    #[error("Signature timestamp invalid: {reason}")]
    SignatureTimestamp { reason: String },

    /// Upstream HTTP transport failure, tagged with the upstream error code
    #[error("HttpProxy:{code}")]
    HttpProxy { code: String, cause: String },

    /// No framed response arrived before the socket idle timeout
    #[error("Socket timeout after {timeout_ms}ms")]
    SocketTimeout { timeout_ms: u64 },

    /// Socket connect/read/write failure
    #[error("Socket error ({target}): {cause}")]
    SocketTransport { target: String, cause: String },

    /// Socket message could not be encoded or decoded
    #[error("Socket codec error: {message}")]
    SocketCodec { message: String },

    /// Entrance, task or file not found
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// File handed to the extract job is not a zip archive
    #[error("Not a zip file: {path}")]
    NotZipFile { path: String },

    /// I/O errors (file operations, directory handling, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration and task descriptors
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a missing-parameter error
    pub fn missing<S: Into<String>>(name: S) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    /// Create a validation error using the default validation code
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
            code: codes::VALIDATION,
        }
    }

    /// Create a forbidden error with a custom reason
    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a signature timestamp error
    pub fn timestamp<S: Into<String>>(reason: S) -> Self {
        Self::SignatureTimestamp {
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable numeric code for this error
    pub fn code(&self) -> u32 {
        match self {
            Self::Configuration { .. } => codes::CONFIGURATION,
            Self::MissingParameter { .. } => codes::MISSING_PARAMETER,
            Self::Validation { code, .. } => *code,
            Self::Unauthenticated => codes::UNAUTHENTICATED,
            Self::Forbidden { .. } => codes::PERMISSION_DENIED,
            Self::IpNotWhitelisted { .. } => codes::PERMISSION_DENIED,
            Self::SignatureMismatch => codes::SIGNATURE_INVALID,
            Self::SignatureTimestamp { .. } => codes::SIGNATURE_TIMESTAMP,
            Self::HttpProxy { .. } => codes::HTTP_PROXY,
            Self::SocketTimeout { .. } => codes::SOCKET_TIMEOUT,
            Self::SocketTransport { .. } => codes::SOCKET_TRANSPORT,
            Self::SocketCodec { .. } => codes::SOCKET_CODEC,
            Self::NotFound { .. } => codes::NOT_FOUND,
            Self::NotZipFile { .. } => codes::NOT_ZIPFILE,
            Self::Io { .. } | Self::Json { .. } | Self::Yaml { .. } | Self::Internal { .. } => {
                codes::INTERNAL
            }
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::SignatureMismatch => StatusCode::UNAUTHORIZED,
            Self::SignatureTimestamp { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::IpNotWhitelisted { .. } => StatusCode::FORBIDDEN,
            Self::MissingParameter { .. } => StatusCode::BAD_REQUEST,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::HttpProxy { .. } => StatusCode::BAD_GATEWAY,
            Self::SocketTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::SocketTransport { .. } => StatusCode::BAD_GATEWAY,
            Self::SocketCodec { .. } => StatusCode::BAD_GATEWAY,
            Self::NotZipFile { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::Validation { .. } => "validation_error",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::IpNotWhitelisted { .. } => "ip_not_whitelisted",
            Self::SignatureMismatch => "signature_mismatch",
            Self::SignatureTimestamp { .. } => "signature_timestamp_invalid",
            Self::HttpProxy { .. } => "http_proxy_error",
            Self::SocketTimeout { .. } => "socket_timeout",
            Self::SocketTransport { .. } => "socket_transport_error",
            Self::SocketCodec { .. } => "socket_codec_error",
            Self::NotFound { .. } => "not_found",
            Self::NotZipFile { .. } => "not_zipfile",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the error belongs to the authentication family
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated
                | Self::Forbidden { .. }
                | Self::IpNotWhitelisted { .. }
                | Self::SignatureMismatch
                | Self::SignatureTimestamp { .. }
        )
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for GatewayError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => io.into(),
            other => Self::Internal {
                message: format!("zip: {}", other),
            },
        }
    }
}

/// Implement `IntoResponse` so handlers can return `GatewayResult<T>` directly
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
