//! # Task Engine
//!
//! Background jobs with on-disk status tracking. A task is written to disk
//! with status `running` before [`TaskEngine::create`] returns; the job
//! itself runs detached and clients poll by id.
//!
//! ## Key Features
//! - **extract**: unzip with byte-based progress
//! - **archive**: zip / tar / tar.gz from directories, files and inline strings
//! - **proxy-export**: replay a dispatch and write its result as JSON or xlsx
//! - exactly one terminal write per task; failures are `finish` plus `error`
//! - startup reconciliation of tasks interrupted by a restart
//!
//! ## Rust Concepts Used
//! - `tokio::spawn` for detached jobs and `spawn_blocking` for archive I/O
//! - A [`TaskRecorder`] owned by exactly one job, so no locking is needed

pub mod archive;
pub mod export;
pub mod extract;
pub mod node;
pub mod store;

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::channel::{Channel, Entrance};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Principal;
use crate::dispatch::Dispatcher;
use crate::observability::GatewayMetrics;

pub use export::ExportFormat;
pub use node::{
    ArchiveFormat, ArchiveNode, ArchiveNodeKind, ArchiveOptions, ProgressResult, TaskKind, TaskNode,
    TaskStatus, TaskTicket,
};
pub use store::TaskStore;

const INTERRUPTED: &str = "interrupted by gateway restart";

/// A dispatch captured at request time, replayed by a proxy-export task
#[derive(Debug, Clone)]
pub struct ProxyExport {
    pub channel: Arc<Channel>,
    pub entrance: Entrance,
    pub payload: Map<String, Value>,
    pub principal: Option<Principal>,
    /// `METHOD /path` of the originating request
    pub route: String,
    /// Raw request input
    pub body: Value,
    pub output: ExportFormat,
}

/// What to run
#[derive(Debug, Clone)]
pub enum TaskRequest {
    Extract { zipfile: PathBuf, output: PathBuf },
    Archive { filename: PathBuf, input: ArchiveOptions },
    ProxyExport(Box<ProxyExport>),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Extract { .. } => TaskKind::Extract,
            TaskRequest::Archive { .. } => TaskKind::Archive,
            TaskRequest::ProxyExport(_) => TaskKind::ProxyExport,
        }
    }

    /// Input snapshot stored in the task descriptor
    fn snapshot(&self) -> Value {
        match self {
            TaskRequest::Extract { zipfile, output } => json!({
                "zipfile": zipfile.display().to_string(),
                "output": output.display().to_string(),
            }),
            TaskRequest::Archive { filename, input } => json!({
                "filename": filename.display().to_string(),
                "input": input,
            }),
            TaskRequest::ProxyExport(export) => json!({
                "route": export.route,
                "body": export.body,
                "payload": export.payload,
            }),
        }
    }
}

/// Sole writer of one task's descriptor and log
pub struct TaskRecorder {
    store: TaskStore,
    node: TaskNode,
}

impl TaskRecorder {
    pub fn new(store: TaskStore, node: TaskNode) -> Self {
        Self { store, node }
    }

    pub fn node(&self) -> &TaskNode {
        &self.node
    }

    /// Intermediate result; ignored once the task is terminal
    pub fn progress(&mut self, results: Value) {
        if self.node.is_terminal() {
            return;
        }
        self.node.results = Some(results.clone());
        self.persist("running", &results, false);
    }

    pub fn finish(&mut self, results: Value) {
        if self.node.is_terminal() {
            return;
        }
        self.node.status = TaskStatus::Finish;
        self.node.results = Some(results.clone());
        self.node.last_time = Some(chrono::Utc::now());
        self.persist("finish", &results, true);
        GatewayMetrics::record_task(self.node.kind.as_str(), "finished");
        info!(pid = %self.node.pid, kind = self.node.kind.as_str(), "Task finished");
    }

    pub fn fail(&mut self, message: String) {
        if self.node.is_terminal() {
            return;
        }
        self.node.status = TaskStatus::Finish;
        self.node.error = Some(message.clone());
        self.node.last_time = Some(chrono::Utc::now());
        self.persist("error", &Value::String(message.clone()), true);
        GatewayMetrics::record_task(self.node.kind.as_str(), "failed");
        warn!(pid = %self.node.pid, kind = self.node.kind.as_str(), error = %message, "Task failed");
    }

    /// Log line first, descriptor second: a reader that sees the new status
    /// also sees its log entry
    fn persist(&self, status: &str, info: &Value, terminal: bool) {
        if let Err(e) = self
            .store
            .append_log(&self.node.pid, self.node.create_time, status, info, terminal)
        {
            error!(pid = %self.node.pid, error = %e, "Failed to append task log");
        }
        if let Err(e) = self.store.save(&self.node) {
            error!(pid = %self.node.pid, error = %e, "Failed to write task descriptor");
        }
    }
}

/// Creates, runs and queries background tasks
#[derive(Clone)]
pub struct TaskEngine {
    store: TaskStore,
    dispatcher: Dispatcher,
    site_host: String,
}

impl TaskEngine {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, site_host: S, dispatcher: Dispatcher) -> Self {
        Self {
            store: TaskStore::new(dir),
            dispatcher,
            site_host: site_host.into(),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Persist a new task, start it and return without waiting for it
    pub async fn create(&self, uid: Option<String>, request: TaskRequest) -> GatewayResult<TaskTicket> {
        let node = TaskNode::new(request.kind(), uid, request.snapshot());
        let ticket = TaskTicket {
            pid: node.pid.clone(),
            kind: node.kind,
        };

        let store = self.store.clone();
        let initial = node.clone();
        blocking(move || store.save(&initial)).await?;
        GatewayMetrics::record_task(node.kind.as_str(), "created");
        info!(pid = %node.pid, kind = node.kind.as_str(), "Task created");

        let recorder = TaskRecorder::new(self.store.clone(), node);
        match request {
            TaskRequest::Extract { zipfile, output } => {
                tokio::task::spawn_blocking(move || run_extract(recorder, &zipfile, &output));
            }
            TaskRequest::Archive { filename, input } => {
                tokio::task::spawn_blocking(move || run_archive(recorder, &filename, &input));
            }
            TaskRequest::ProxyExport(export) => {
                let engine = self.clone();
                tokio::spawn(async move { engine.run_export(recorder, *export).await });
            }
        }

        Ok(ticket)
    }

    pub async fn list(&self, uid: Option<String>) -> GatewayResult<Vec<TaskNode>> {
        let store = self.store.clone();
        blocking(move || store.list(uid.as_deref())).await
    }

    pub async fn get(&self, pid: &str) -> GatewayResult<TaskNode> {
        let store = self.store.clone();
        let pid = pid.to_string();
        blocking(move || store.load(&pid)).await
    }

    pub async fn delete(&self, pid: &str) -> GatewayResult<()> {
        let store = self.store.clone();
        let pid = pid.to_string();
        blocking(move || store.delete(&pid)).await?;
        GatewayMetrics::record_task("any", "deleted");
        Ok(())
    }

    pub async fn file_path(&self, pid: &str, file: &str) -> GatewayResult<PathBuf> {
        self.store.file_path(pid, file)
    }

    /// Finish every task a previous process left running
    ///
    /// Returns how many tasks were reconciled.
    pub async fn reconcile(&self) -> GatewayResult<usize> {
        let store = self.store.clone();
        blocking(move || {
            let stale: Vec<TaskNode> = store
                .list(None)?
                .into_iter()
                .filter(|node| !node.is_terminal())
                .collect();
            let count = stale.len();
            for node in stale {
                TaskRecorder::new(store.clone(), node).fail(INTERRUPTED.to_string());
            }
            Ok(count)
        })
        .await
    }

    async fn run_export(&self, mut recorder: TaskRecorder, export: ProxyExport) {
        let result = self
            .dispatcher
            .dispatch(
                &export.channel,
                &export.entrance,
                &export.payload,
                export.principal.as_ref(),
            )
            .await;

        let dir = self.store.root().join(&recorder.node().pid);
        let url_base = format!("{}/tasks/{}", self.site_host.trim_end_matches('/'), recorder.node().pid);
        let format = export.output;

        let written = tokio::task::spawn_blocking(move || {
            match result.and_then(|output| {
                let name = export::export_name();
                export::write_export(&dir, &name, &output.to_value(), format)?;
                Ok(name)
            }) {
                Ok(name) => recorder.finish(json!({
                    "url": format!("{}/{}.{}", url_base, name, format.extension())
                })),
                Err(e) => recorder.fail(e.to_string()),
            }
        })
        .await;

        if let Err(e) = written {
            error!(error = %e, "Export task worker panicked");
        }
    }
}

fn run_extract(mut recorder: TaskRecorder, zipfile: &Path, output: &Path) {
    let outcome = extract::extract_zip(zipfile, output, |progress| {
        recorder.progress(to_value(progress));
    });
    match outcome {
        Ok(done) => recorder.finish(to_value(&done)),
        Err(e) => recorder.fail(e.to_string()),
    }
}

fn run_archive(mut recorder: TaskRecorder, filename: &Path, input: &ArchiveOptions) {
    let outcome = archive::create_archive(filename, input, |entry| {
        recorder.progress(to_value(entry));
    });
    match outcome {
        Ok(file) => recorder.finish(to_value(&file)),
        Err(e) => recorder.fail(e.to_string()),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Run blocking filesystem work off the async workers
async fn blocking<F, T>(f: F) -> GatewayResult<T>
where
    F: FnOnce() -> GatewayResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GatewayError::internal(format!("task worker failed: {}", e)))?
}

/// Resolve a caller-supplied path against the task workspace root
///
/// Absolute paths and paths climbing out of the root are rejected.
pub fn workspace_path(root: &Path, relative: &str) -> GatewayResult<PathBuf> {
    extract::safe_relative(relative)
        .map(|rel| root.join(rel))
        .ok_or_else(|| GatewayError::validation("path", format!("path escapes the workspace: {}", relative)))
}
