//! # HTTP Server Module
//!
//! Axum surface of the gateway: channel proxy routes, the task query surface,
//! health and metrics.
//!
//! ## Routes
//! ```text
//! {prefix}/:channel[/:label[/:tag]]   GET POST PUT DELETE   ?callback=task&output=json|xlsx
//! /tasks                              GET POST DELETE
//! /tasks/:pid                         GET DELETE
//! /tasks/:pid/:file                   GET   (log -> task.log)
//! /health                             GET
//! /metrics                            GET   (when metrics are enabled)
//! ```
//!
//! ## Rust Concepts Used
//!
//! - `State<ServerState>` cloned into every handler; all members are cheap `Arc`s
//! - `Option<ConnectInfo<_>>` so handlers also run under test servers without
//!   connection info
//! - Tower layers for tracing, CORS and the body limit

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, instrument};

use crate::auth::IdentityProvider;
use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{DispatchOutput, Envelope, Identity, Principal, RequestContext};
use crate::gateway::proxy::{Gateway, ProxyOptions, ProxyOutcome};
use crate::observability::GatewayMetrics;
use crate::task::{workspace_path, ArchiveNodeKind, ArchiveOptions, ExportFormat, TaskNode, TaskRequest};

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    pub gateway: Gateway,
    /// Root against which task archive/extract paths are resolved
    pub workspace_root: PathBuf,
    /// Role that may see and delete every user's tasks
    pub privileged_role: String,
    pub metrics: Option<GatewayMetrics>,
}

/// The gateway HTTP server
pub struct GatewayServer {
    config: ServerConfig,
    app: Router,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, state: ServerState) -> Self {
        let app = build_router(&config, state);
        Self { config, app }
    }

    /// Router with every route and layer attached
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Serve until `shutdown` resolves
    #[instrument(skip(self, shutdown))]
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", addr, e)))?;
        info!("Gateway HTTP server listening on {}", addr);

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))
    }
}

/// Assemble routes and layers
pub fn build_router(config: &ServerConfig, state: ServerState) -> Router {
    let proxy_routes = Router::new()
        .route("/:channel", proxy_method_router())
        .route("/:channel/:label", proxy_method_router())
        .route("/:channel/:label/:tag", proxy_method_router());

    let prefix = config.proxy_prefix.trim_end_matches('/');
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/tasks", get(list_tasks).post(create_task).delete(delete_tasks))
        .route("/tasks/:pid", get(get_task).delete(delete_task))
        .route("/tasks/:pid/:file", get(task_file));

    app = if prefix.is_empty() {
        app.merge(proxy_routes)
    } else {
        app.nest(prefix, proxy_routes)
    };

    let mut app = app.with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(config.max_request_size)),
    );

    if config.enable_cors {
        app = app.layer(CorsLayer::permissive());
        info!("CORS enabled for all origins");
    }
    app
}

fn proxy_method_router() -> axum::routing::MethodRouter<ServerState> {
    get(proxy_handler)
        .post(proxy_handler)
        .put(proxy_handler)
        .delete(proxy_handler)
}

#[derive(Debug, Deserialize)]
struct ProxyPath {
    channel: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

/// `METHOD /:channel/:label?/:tag?`
async fn proxy_handler(
    State(state): State<ServerState>,
    Path(path): Path<ProxyPath>,
    Query(mut query): Query<HashMap<String, String>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let options = ProxyOptions {
        as_task: query.remove("callback").as_deref() == Some("task"),
        output: ExportFormat::from_query(query.remove("output").as_deref()),
    };

    let label = path.label.clone().unwrap_or_default();
    let response = match request_input(&method, query, &body) {
        Ok(input) => {
            let mut request = RequestContext::new(method, path.channel.clone())
                .with_input(input)
                .with_headers(headers);
            if let Some(label) = path.label.as_deref() {
                request = request.with_label(label);
            }
            if let Some(tag) = path.tag.as_deref() {
                request = request.with_tag(tag);
            }
            if let Some(ConnectInfo(addr)) = connect {
                request = request.with_client_ip(addr.ip());
            }

            match state.gateway.handle(&request, options).await {
                Ok(outcome) => outcome_response(outcome),
                Err(e) => {
                    debug!(channel = %path.channel, label = %label, error = %e, "Gateway request failed");
                    e.into_response()
                }
            }
        }
        Err(e) => e.into_response(),
    };

    GatewayMetrics::record_request(&path.channel, &label, response.status().as_u16(), started.elapsed());
    response
}

/// GET reads the query string; other methods read a JSON body (empty means `{}`)
fn request_input(method: &Method, query: HashMap<String, String>, body: &Bytes) -> GatewayResult<Value> {
    if *method == Method::GET {
        let map: Map<String, Value> = query.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        return Ok(Value::Object(map));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::validation("body", format!("invalid JSON body: {}", e)))
}

fn outcome_response(outcome: ProxyOutcome) -> Response {
    match outcome {
        ProxyOutcome::Output(DispatchOutput::Structured(value)) => Json(Envelope::new(value)).into_response(),
        ProxyOutcome::Output(DispatchOutput::Raw { body, content_type }) => {
            let content_type = HeaderValue::from_str(&content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        ProxyOutcome::Task(ticket) => Json(Envelope::new(ticket)).into_response(),
    }
}

/// Caller of a task endpoint and whether they may act on every task
struct TaskCaller {
    /// Owner id in the same namespace as [`Principal::owner_id`]
    owner: String,
    privileged: bool,
}

impl TaskCaller {
    fn new(identity: Identity, privileged_role: &str) -> Self {
        let privileged = identity.has_role(privileged_role);
        Self {
            owner: Principal::User(identity).owner_id(),
            privileged,
        }
    }

    fn owns(&self, node: &TaskNode) -> bool {
        self.privileged || node.uid.as_deref() == Some(self.owner.as_str())
    }
}

async fn task_caller(state: &ServerState, headers: &HeaderMap) -> GatewayResult<TaskCaller> {
    let identity = state
        .gateway
        .auth()
        .identity_provider()
        .identify(headers)
        .await?
        .ok_or(GatewayError::Unauthenticated)?;
    Ok(TaskCaller::new(identity, &state.privileged_role))
}

/// Load a task the caller is allowed to see
async fn owned_task(state: &ServerState, caller: &TaskCaller, pid: &str) -> GatewayResult<TaskNode> {
    let node = state.gateway.tasks().get(pid).await?;
    if caller.owns(&node) {
        Ok(node)
    } else {
        Err(GatewayError::forbidden(format!("task {} belongs to another user", pid)))
    }
}

async fn list_tasks(State(state): State<ServerState>, headers: HeaderMap) -> GatewayResult<Json<Envelope<Vec<TaskNode>>>> {
    let caller = task_caller(&state, &headers).await?;
    let owner = (!caller.privileged).then(|| caller.owner.clone());
    let nodes = state.gateway.tasks().list(owner).await?;
    Ok(Json(Envelope::new(nodes)))
}

/// Body of `POST /tasks`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CreateTask {
    #[serde(alias = "unzip")]
    Extract { zipfile: String, output: String },
    #[serde(alias = "archiver")]
    Archive { filename: String, input: ArchiveOptions },
}

impl CreateTask {
    /// Resolve every caller-supplied path against the workspace root
    fn into_request(self, root: &std::path::Path) -> GatewayResult<TaskRequest> {
        match self {
            CreateTask::Extract { zipfile, output } => Ok(TaskRequest::Extract {
                zipfile: workspace_path(root, &zipfile)?,
                output: workspace_path(root, &output)?,
            }),
            CreateTask::Archive { filename, mut input } => {
                for node in input.content.iter_mut() {
                    if node.kind != ArchiveNodeKind::String {
                        node.name = workspace_path(root, &node.name)?.to_string_lossy().into_owned();
                    }
                }
                Ok(TaskRequest::Archive {
                    filename: workspace_path(root, &filename)?,
                    input,
                })
            }
        }
    }
}

async fn create_task(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<CreateTask>,
) -> GatewayResult<Response> {
    let caller = task_caller(&state, &headers).await?;
    let request = body.into_request(&state.workspace_root)?;
    let ticket = state
        .gateway
        .tasks()
        .create(Some(caller.owner.clone()), request)
        .await?;
    Ok(Json(Envelope::new(ticket)).into_response())
}

#[derive(Debug, Deserialize)]
struct DeleteTasks {
    ids: Vec<String>,
}

async fn delete_tasks(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<DeleteTasks>,
) -> GatewayResult<Json<Envelope<Value>>> {
    let caller = task_caller(&state, &headers).await?;
    let mut deleted = Vec::with_capacity(body.ids.len());
    for pid in &body.ids {
        owned_task(&state, &caller, pid).await?;
        state.gateway.tasks().delete(pid).await?;
        deleted.push(pid.clone());
    }
    info!(count = deleted.len(), owner = %caller.owner, "Tasks deleted");
    Ok(Json(Envelope::new(json!({ "deleted": deleted }))))
}

async fn get_task(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(pid): Path<String>,
) -> GatewayResult<Json<Envelope<TaskNode>>> {
    let caller = task_caller(&state, &headers).await?;
    let node = owned_task(&state, &caller, &pid).await?;
    Ok(Json(Envelope::new(node)))
}

async fn delete_task(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(pid): Path<String>,
) -> GatewayResult<Json<Envelope<Value>>> {
    let caller = task_caller(&state, &headers).await?;
    owned_task(&state, &caller, &pid).await?;
    state.gateway.tasks().delete(&pid).await?;
    Ok(Json(Envelope::new(json!({ "deleted": [pid] }))))
}

/// Raw task artifact, or the task log for `file = log`
async fn task_file(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path((pid, file)): Path<(String, String)>,
) -> GatewayResult<Response> {
    let caller = task_caller(&state, &headers).await?;
    owned_task(&state, &caller, &pid).await?;
    let path = state.gateway.tasks().file_path(&pid, &file).await?;
    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GatewayError::not_found(format!("file {} of task {}", file, pid)))
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("log") | Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], content).into_response())
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        )
            .into_response(),
        None => GatewayError::not_found("metrics endpoint").into_response(),
    }
}
