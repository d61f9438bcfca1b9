//! # Gateway Pipeline
//!
//! The per-request flow behind `METHOD /{channel}/{label?}/{tag?}`, kept free
//! of HTTP types so it can be driven directly from tests.
//!
//! ```text
//! snapshot ─> resolve ─> whitelist ─> requirements ─> payload ─> verify
//!          ─> props/strip ─> dispatch  (or schedule a proxy-export task)
//! ```

use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::AuthPipeline;
use crate::channel::ChannelStore;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{DispatchOutput, Principal, RequestContext};
use crate::dispatch::Dispatcher;
use crate::routing::{resolve, ResolvedEntrance};
use crate::task::{ExportFormat, ProxyExport, TaskEngine, TaskRequest, TaskTicket};
use crate::transform::{build_payload, finish_payload, PayloadRequest};

/// How the caller wants the request fulfilled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyOptions {
    /// `callback=task`: run as a background export instead of inline
    pub as_task: bool,
    /// `output=json|xlsx` for task exports
    pub output: ExportFormat,
}

/// Result of one gateway request
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyOutcome {
    Output(DispatchOutput),
    Task(TaskTicket),
}

/// Shared request pipeline
#[derive(Clone)]
pub struct Gateway {
    channels: Arc<ChannelStore>,
    auth: AuthPipeline,
    dispatcher: Dispatcher,
    tasks: TaskEngine,
}

impl Gateway {
    pub fn new(channels: Arc<ChannelStore>, auth: AuthPipeline, dispatcher: Dispatcher, tasks: TaskEngine) -> Self {
        Self {
            channels,
            auth,
            dispatcher,
            tasks,
        }
    }

    pub fn channels(&self) -> &Arc<ChannelStore> {
        &self.channels
    }

    pub fn auth(&self) -> &AuthPipeline {
        &self.auth
    }

    pub fn tasks(&self) -> &TaskEngine {
        &self.tasks
    }

    /// Run one request through the pipeline
    pub async fn handle(&self, request: &RequestContext, options: ProxyOptions) -> GatewayResult<ProxyOutcome> {
        let channel = self.channels.get(&request.channel).await?;

        let ResolvedEntrance {
            mut entrance,
            input,
            signing_user,
        } = resolve(&channel, request).ok_or_else(|| {
            GatewayError::not_found(format!(
                "entrance {} {}/{}",
                request.method,
                request.channel,
                request.label_or_root()
            ))
        })?;
        debug!(
            channel = %channel.name,
            entrance = %entrance.name,
            signing_user = signing_user.as_deref().unwrap_or(""),
            "Resolved entrance"
        );

        self.auth
            .check_whitelist(&channel.setting, &entrance, request.client_ip)?;

        let state = self.auth.evaluate(&mut entrance, &request.headers).await?;
        state.ensure_allowed()?;

        let tag = request.tag.as_deref();
        let payload = build_payload(PayloadRequest {
            input: &input,
            schema: entrance.payload.as_deref(),
            tag,
        })?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let principal = self
            .auth
            .verify_payload(&state, &payload, &channel.setting, tag, now_ms)?;

        let strip: Vec<&str> = state.sign_field().into_iter().collect();
        let payload = finish_payload(payload, entrance.props.as_ref(), &strip);

        if options.as_task {
            let export = ProxyExport {
                channel: Arc::clone(&channel),
                entrance,
                payload,
                principal: principal.clone(),
                route: format!(
                    "{} /{}/{}",
                    request.method,
                    request.channel,
                    request.label.as_deref().unwrap_or("")
                ),
                body: request.input.clone(),
                output: options.output,
            };
            let uid = principal.as_ref().map(Principal::owner_id);
            let ticket = self
                .tasks
                .create(uid, TaskRequest::ProxyExport(Box::new(export)))
                .await?;
            info!(channel = %channel.name, pid = %ticket.pid, "Scheduled proxy export");
            return Ok(ProxyOutcome::Task(ticket));
        }

        let output = self
            .dispatcher
            .dispatch(&channel, &entrance, &payload, principal.as_ref())
            .await?;
        Ok(ProxyOutcome::Output(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature::{DigestAlgorithm, SignOptions, SignToken};
    use crate::auth::StaticIdentityProvider;
    use crate::core::types::Identity;
    use crate::dispatch::ServiceRegistry;
    use crate::task::TaskKind;
    use axum::http::Method;
    use serde_json::{json, Map, Value};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    const API: &str = r#"
- name: open
  router: [{ method: POST, path: open }]
  payload: [{ key: a, type: integer }]
  service: { name: echo }
- name: admin
  router: [{ method: GET, path: admin }]
  authentication:
    - { type: capability, user: { roles: admin } }
  service: { name: echo }
- name: signed
  router: [{ method: POST, path: signed }]
  payload: [{ key: id }]
  props: { ident: id }
  authentication:
    - type: signature
      sign: { token: s3cret }
  service: { name: echo }
"#;

    fn gateway(root: &Path, identity: Option<Identity>) -> Gateway {
        let channel_dir = root.join("channels/alpha");
        fs::create_dir_all(&channel_dir).unwrap();
        fs::write(channel_dir.join("api.yaml"), API).unwrap();
        fs::write(channel_dir.join("setting.yaml"), "whitelist: []\n").unwrap();

        let provider = match identity {
            Some(identity) => StaticIdentityProvider::new(identity),
            None => StaticIdentityProvider::anonymous(),
        };
        let dispatcher =
            Dispatcher::new(Duration::from_secs(5), Arc::new(ServiceRegistry::with_builtins())).unwrap();
        Gateway::new(
            Arc::new(ChannelStore::new(root.join("channels"))),
            AuthPipeline::new(Arc::new(provider)),
            dispatcher.clone(),
            TaskEngine::new(root.join("tasks"), "http://localhost", dispatcher),
        )
    }

    fn signed_payload(id: &str) -> Value {
        let options = SignOptions {
            token: SignToken::Single("s3cret".into()),
            digest: None,
            algorithm: DigestAlgorithm::Md5,
            field: "sign".into(),
            debug: false,
        };
        let mut map = Map::new();
        map.insert("id".into(), json!(id));
        let sign = options.sign(&map, "s3cret");
        json!({ "id": id, "sign": sign })
    }

    #[tokio::test]
    async fn test_unknown_label_is_not_found() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), None);
        let request = RequestContext::new(Method::GET, "alpha").with_label("nope");
        let err = gw.handle(&request, ProxyOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_open_entrance_dispatches_validated_payload() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), None);
        let request = RequestContext::new(Method::POST, "alpha")
            .with_label("open")
            .with_input(json!({ "a": "7", "junk": true }));

        let outcome = gw.handle(&request, ProxyOptions::default()).await.unwrap();
        assert_eq!(
            outcome,
            ProxyOutcome::Output(DispatchOutput::Structured(json!({ "args": [], "payload": { "a": 7 } })))
        );
    }

    #[tokio::test]
    async fn test_capability_outcomes() {
        let dir = TempDir::new().unwrap();
        let request = RequestContext::new(Method::GET, "alpha").with_label("admin");

        let err = gateway(dir.path(), None)
            .handle(&request, ProxyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));

        let guest = Identity::new("2", "guest");
        let err = gateway(dir.path(), Some(guest))
            .handle(&request, ProxyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));

        let admin = Identity::new("1", "root").with_roles(&["admin"]);
        assert!(gateway(dir.path(), Some(admin))
            .handle(&request, ProxyOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_signature_verified_before_props_and_stripped() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), None);

        let request = RequestContext::new(Method::POST, "alpha")
            .with_label("signed")
            .with_input(signed_payload("42"));
        let outcome = gw.handle(&request, ProxyOptions::default()).await.unwrap();
        assert_eq!(
            outcome,
            ProxyOutcome::Output(DispatchOutput::Structured(json!({ "args": [], "payload": { "ident": "42" } })))
        );

        let mut tampered = signed_payload("42");
        tampered["id"] = json!("43");
        let request = RequestContext::new(Method::POST, "alpha")
            .with_label("signed")
            .with_input(tampered);
        let err = gw.handle(&request, ProxyOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::SignatureMismatch));
    }

    #[tokio::test]
    async fn test_task_callback_schedules_export() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(dir.path(), Some(Identity::new("9", "ops").with_roles(&["admin"])));
        let request = RequestContext::new(Method::GET, "alpha").with_label("admin");

        let outcome = gw
            .handle(
                &request,
                ProxyOptions {
                    as_task: true,
                    output: ExportFormat::Json,
                },
            )
            .await
            .unwrap();
        let ProxyOutcome::Task(ticket) = outcome else {
            panic!("expected a task ticket");
        };
        assert_eq!(ticket.kind, TaskKind::ProxyExport);

        let node = gw.tasks().get(&ticket.pid).await.unwrap();
        assert_eq!(node.uid.as_deref(), Some("user:9"));
        assert_eq!(node.data["route"], json!("GET /alpha/admin"));
    }
}
