//! # Authentication
//!
//! - [`providers`]: who the caller is (JWT or static identity)
//! - [`predicate`]: capability query documents over the identity
//! - [`signature`]: digest signing, verification and timestamp freshness
//! - [`pipeline`]: whitelist and ordered requirement evaluation per request

pub mod pipeline;
pub mod predicate;
pub mod providers;
pub mod signature;

pub use pipeline::{AuthPipeline, AuthState};
pub use predicate::Predicate;
pub use providers::{IdentityProvider, JwtIdentityProvider, StaticIdentityProvider};
pub use signature::{DigestAlgorithm, SignOptions, SignToken, TokenOptions};
