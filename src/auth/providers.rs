//! # Identity Providers
//!
//! Capability entrances ask an [`IdentityProvider`] who the caller is. The
//! provider never fails a request on its own: a missing, expired or invalid
//! credential simply yields no identity, and the authentication pipeline
//! turns that into `401 Unauthorized`.
//!
//! ## Providers
//! - [`JwtIdentityProvider`]: bearer JWTs validated with `jsonwebtoken`
//! - [`StaticIdentityProvider`]: a fixed identity (or none), for tests and
//!   single-tenant deployments

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

use crate::core::config::AuthConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Identity;

/// Resolves the caller's identity from request headers
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, headers: &HeaderMap) -> GatewayResult<Option<Identity>>;
}

/// Claims carried by gateway JWTs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Remaining claims
    #[serde(flatten)]
    pub custom_claims: Map<String, Value>,
}

impl From<JwtClaims> for Identity {
    fn from(claims: JwtClaims) -> Self {
        Identity {
            name: claims.name.unwrap_or_else(|| claims.sub.clone()),
            id: claims.sub,
            roles: claims.roles,
            claims: claims.custom_claims,
        }
    }
}

/// Bearer JWT identity provider
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    /// HMAC-secret provider
    pub fn new(secret: &str, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Build from the `auth` configuration section
    pub fn from_config(config: &AuthConfig) -> GatewayResult<Self> {
        let secret = config
            .jwt_secret
            .as_deref()
            .ok_or_else(|| GatewayError::missing("auth.jwt_secret"))?;
        let algorithm = Algorithm::from_str(&config.jwt_algorithm).map_err(|e| {
            GatewayError::config(format!("Invalid JWT algorithm {}: {}", config.jwt_algorithm, e))
        })?;
        Ok(Self::new(secret, algorithm))
    }

    fn extract_token(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn identify(&self, headers: &HeaderMap) -> GatewayResult<Option<Identity>> {
        let Some(token) = Self::extract_token(headers) else {
            return Ok(None);
        };

        match decode::<JwtClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(Some(data.claims.into())),
            Err(e) => {
                debug!(error = %e, "Rejected bearer token");
                Ok(None)
            }
        }
    }
}

/// Provider returning the same identity for every request
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    identity: Option<Identity>,
}

impl StaticIdentityProvider {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// Provider that never yields an identity
    pub fn anonymous() -> Self {
        Self { identity: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn identify(&self, _headers: &HeaderMap) -> GatewayResult<Option<Identity>> {
        Ok(self.identity.clone())
    }
}
