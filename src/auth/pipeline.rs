//! # Authentication Pipeline
//!
//! Runs in three steps around payload building:
//!
//! 1. [`AuthPipeline::check_whitelist`]: caller address against the union of
//!    channel and entrance patterns
//! 2. [`AuthPipeline::evaluate`]: the entrance's ordered requirements. A
//!    capability requirement looks the caller up once and stops evaluation on
//!    success; a signature requirement adds its field to the payload schema.
//!    The last evaluated requirement decides the state.
//! 3. [`AuthPipeline::verify_payload`]: once the payload is assembled, the
//!    timestamp policy and the digest are checked for signature states
//!
//! ## State machine
//! ```text
//! Open ──capability──> Unauthenticated (401) | Denied (403) | Granted
//!      ──signature───> Signature ──verify──> Signer | mismatch (401)
//! ```

use axum::http::HeaderMap;
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::auth::providers::IdentityProvider;
use crate::auth::signature::{check_timestamp, SignOptions};
use crate::channel::{Authentication, ChannelSetting, Entrance};
use crate::core::error::{codes, GatewayError, GatewayResult};
use crate::core::types::{Identity, Principal};
use crate::transform::FieldSpec;

/// Outcome of evaluating an entrance's requirements
#[derive(Debug, Clone)]
pub enum AuthState {
    /// No requirements
    Open,
    /// Capability requirement with no identity available
    Unauthenticated,
    /// Identity present but no capability predicate matched
    Denied(Identity),
    /// A capability predicate matched
    Granted(Identity),
    /// Signature requirement; verified after payload building
    Signature(SignOptions),
}

impl AuthState {
    /// Fail fast on capability outcomes that can never succeed
    pub fn ensure_allowed(&self) -> GatewayResult<()> {
        match self {
            AuthState::Unauthenticated => Err(GatewayError::Unauthenticated),
            AuthState::Denied(identity) => Err(GatewayError::forbidden(format!(
                "identity {} does not satisfy the capability requirement",
                identity.id
            ))),
            _ => Ok(()),
        }
    }

    /// Signature field to strip from the dispatched payload
    pub fn sign_field(&self) -> Option<&str> {
        match self {
            AuthState::Signature(opts) => Some(opts.field.as_str()),
            _ => None,
        }
    }
}

/// Evaluates whitelist, capability and signature requirements
#[derive(Clone)]
pub struct AuthPipeline {
    identity: Arc<dyn IdentityProvider>,
}

impl AuthPipeline {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Identity provider backing capability checks
    pub fn identity_provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Fail closed when a whitelist exists and the caller matches none of it
    pub fn check_whitelist(
        &self,
        setting: &ChannelSetting,
        entrance: &Entrance,
        client_ip: Option<IpAddr>,
    ) -> GatewayResult<()> {
        if setting.whitelist.is_empty() && entrance.whitelist.is_empty() {
            return Ok(());
        }

        let address = client_ip.map(|ip| ip.to_string()).unwrap_or_default();
        let allowed = !address.is_empty()
            && (setting.whitelist.is_match(&address) || entrance.whitelist.is_match(&address));

        if allowed {
            Ok(())
        } else {
            Err(GatewayError::IpNotWhitelisted { address })
        }
    }

    /// Evaluate the ordered requirements of a request-scoped entrance
    ///
    /// Signature requirements extend `entrance.payload` when it has a schema.
    pub async fn evaluate(&self, entrance: &mut Entrance, headers: &HeaderMap) -> GatewayResult<AuthState> {
        let mut state = AuthState::Open;
        let mut identity: Option<Option<Identity>> = None;
        let mut extra_fields = Vec::new();

        for requirement in &entrance.authentication {
            match requirement {
                Authentication::Capability { user } => {
                    if identity.is_none() {
                        identity = Some(self.identity.identify(headers).await?);
                    }
                    match identity.as_ref().and_then(|i| i.as_ref()) {
                        Some(caller) if user.matches(&caller.as_value()) => {
                            debug!(entrance = %entrance.name, user = %caller.id, "Capability granted");
                            state = AuthState::Granted(caller.clone());
                            break;
                        }
                        Some(caller) => state = AuthState::Denied(caller.clone()),
                        None => state = AuthState::Unauthenticated,
                    }
                }
                Authentication::Signature { sign } => {
                    extra_fields.push(if sign.debug {
                        FieldSpec::optional_string(&sign.field)
                    } else {
                        FieldSpec::required_string(&sign.field, "missing signature", codes::SIGNATURE_INVALID)
                    });
                    state = AuthState::Signature(sign.clone());
                }
            }
        }

        if let Some(schema) = entrance.payload.as_mut() {
            schema.extend(extra_fields);
        }
        Ok(state)
    }

    /// Post-build checks; returns who the request is authenticated as
    pub fn verify_payload(
        &self,
        state: &AuthState,
        payload: &Map<String, Value>,
        setting: &ChannelSetting,
        tag: Option<&str>,
        now_ms: i64,
    ) -> GatewayResult<Option<Principal>> {
        match state {
            AuthState::Granted(identity) => Ok(Some(Principal::User(identity.clone()))),
            AuthState::Signature(sign) if sign.debug => Ok(None),
            AuthState::Signature(sign) => {
                if let Some(policy) = setting.signuser.as_ref().and_then(|r| r.timestamp.as_ref()) {
                    check_timestamp(payload, policy, now_ms)?;
                }
                let signer = sign.verify(payload, tag)?;
                debug!(signer = %signer, "Signature verified");
                Ok(Some(Principal::Signer(signer)))
            }
            other => {
                other.ensure_allowed()?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::providers::StaticIdentityProvider;
    use crate::auth::signature::{SignToken, TokenOptions};
    use crate::channel::{TimestampPolicy, Whitelist};
    use serde_json::json;

    fn entrance(yaml: &str) -> Entrance {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn pipeline(identity: Option<Identity>) -> AuthPipeline {
        let provider = match identity {
            Some(identity) => StaticIdentityProvider::new(identity),
            None => StaticIdentityProvider::anonymous(),
        };
        AuthPipeline::new(Arc::new(provider))
    }

    const CAPABILITY: &str = r#"
name: admin-only
router: [{ method: GET, path: x }]
service: { name: echo }
authentication:
  - type: capability
    user: { roles: admin }
"#;

    #[tokio::test]
    async fn test_capability_states() {
        let headers = HeaderMap::new();

        let state = pipeline(None).evaluate(&mut entrance(CAPABILITY), &headers).await.unwrap();
        assert!(matches!(
            state.ensure_allowed(),
            Err(GatewayError::Unauthenticated)
        ));

        let guest = Identity::new("1", "guest").with_roles(&["guest"]);
        let state = pipeline(Some(guest)).evaluate(&mut entrance(CAPABILITY), &headers).await.unwrap();
        assert!(matches!(state.ensure_allowed(), Err(GatewayError::Forbidden { .. })));

        let admin = Identity::new("2", "root").with_roles(&["admin"]);
        let state = pipeline(Some(admin)).evaluate(&mut entrance(CAPABILITY), &headers).await.unwrap();
        assert!(matches!(state, AuthState::Granted(ref i) if i.id == "2"));
    }

    #[tokio::test]
    async fn test_capability_short_circuits_on_success() {
        let mut e = entrance(
            r#"
name: either
router: [{ method: GET, path: x }]
service: { name: echo }
payload: [{ key: a }]
authentication:
  - type: capability
    user: { roles: admin }
  - type: signature
    sign: { token: k }
"#,
        );
        let admin = Identity::new("2", "root").with_roles(&["admin"]);
        let state = pipeline(Some(admin)).evaluate(&mut e, &HeaderMap::new()).await.unwrap();
        assert!(matches!(state, AuthState::Granted(_)));
        // The signature requirement was never reached
        assert_eq!(e.payload.as_ref().unwrap().len(), 1);

        let mut e2 = e.clone();
        let state = pipeline(None).evaluate(&mut e2, &HeaderMap::new()).await.unwrap();
        assert!(matches!(state, AuthState::Signature(_)));
        assert_eq!(e2.payload.as_ref().unwrap()[1].key, "sign");
    }

    #[test]
    fn test_whitelist() {
        let p = pipeline(None);
        let mut setting = ChannelSetting::default();
        let e = entrance("name: w\nrouter: [{ method: GET }]\nservice: { name: echo }\nwhitelist: ['^10\\.']\n");

        let inside: IpAddr = "10.0.0.8".parse().unwrap();
        let outside: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(p.check_whitelist(&setting, &e, Some(inside)).is_ok());
        assert!(matches!(
            p.check_whitelist(&setting, &e, Some(outside)),
            Err(GatewayError::IpNotWhitelisted { .. })
        ));
        assert!(p.check_whitelist(&setting, &e, None).is_err());

        setting.whitelist = Whitelist::new(&[r"^192\.168\."]).unwrap();
        assert!(p.check_whitelist(&setting, &e, Some(outside)).is_ok());
    }

    #[test]
    fn test_verify_payload_with_timestamp_policy() {
        let p = pipeline(None);
        let sign = SignOptions {
            token: SignToken::Many(vec![TokenOptions {
                key: "k".into(),
                name: "partner".into(),
                tags: vec!["1001".into()],
            }]),
            digest: None,
            algorithm: Default::default(),
            field: "sign".into(),
            debug: false,
        };
        let mut setting = ChannelSetting::default();
        setting.signuser = Some(crate::channel::SignUserRegistry {
            timestamp: Some(TimestampPolicy { field: "ts".into(), timeout: 1000 }),
            ..Default::default()
        });

        let now = 1_700_000_000_000i64;
        let mut payload = json!({ "ts": now - 100 }).as_object().unwrap().clone();
        let sig = sign.sign(&payload, "k");
        payload.insert("sign".into(), json!(sig));

        let state = AuthState::Signature(sign);
        let principal = p.verify_payload(&state, &payload, &setting, Some("1001"), now).unwrap();
        assert_eq!(principal, Some(Principal::Signer("partner".into())));

        let late = p.verify_payload(&state, &payload, &setting, Some("1001"), now + 5000);
        assert!(matches!(late, Err(GatewayError::SignatureTimestamp { .. })));
    }
}
