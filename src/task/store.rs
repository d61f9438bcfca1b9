//! On-disk task state.
//!
//! ```text
//! <tasks>/<pid>/setting.yml   current TaskNode
//! <tasks>/<pid>/task.log      append-only status log
//! <tasks>/<pid>/<name>.<ext>  exported results
//! ```
//!
//! The log is bracketed by `createTime:` and `lastTime:` markers; once the
//! closing marker is written nothing else is appended.
//!
//! All operations are synchronous and meant to run on blocking threads.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::task::node::TaskNode;

pub const SETTING_FILE: &str = "setting.yml";
pub const LOG_FILE: &str = "task.log";

const RULE: &str = "----------------------------------------------------------";
const CLOSING_MARKER: &str = "lastTime:";

/// Task directory layout rooted at one path
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one task; fails for ids that are not plain uuids
    pub fn task_dir(&self, pid: &str) -> GatewayResult<PathBuf> {
        if uuid::Uuid::parse_str(pid).is_err() {
            return Err(GatewayError::not_found(format!("task {}", pid)));
        }
        Ok(self.root.join(pid))
    }

    /// Write the descriptor, replacing the previous one atomically
    pub fn save(&self, node: &TaskNode) -> GatewayResult<()> {
        let dir = self.task_dir(&node.pid)?;
        fs::create_dir_all(&dir)?;
        let yaml = serde_yaml::to_string(node)?;
        let tmp = dir.join(format!("{}.tmp", SETTING_FILE));
        fs::write(&tmp, yaml)?;
        fs::rename(&tmp, dir.join(SETTING_FILE))?;
        Ok(())
    }

    pub fn load(&self, pid: &str) -> GatewayResult<TaskNode> {
        let path = self.task_dir(pid)?.join(SETTING_FILE);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GatewayError::not_found(format!("task {}", pid)),
            _ => e.into(),
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Every readable descriptor, optionally restricted to one owner
    ///
    /// Directories without a parseable descriptor are skipped.
    pub fn list(&self, uid: Option<&str>) -> GatewayResult<Vec<TaskNode>> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }

        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(node) => tasks.push(node),
                Err(e) => debug!(dir = %name, error = %e, "Skipping unreadable task directory"),
            }
        }

        if let Some(uid) = uid {
            tasks.retain(|node| node.uid.as_deref() == Some(uid));
        }
        tasks.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(tasks)
    }

    /// Remove a task and everything it produced
    pub fn delete(&self, pid: &str) -> GatewayResult<()> {
        let dir = self.task_dir(pid)?;
        if !dir.is_dir() {
            return Err(GatewayError::not_found(format!("task {}", pid)));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    /// Path of a file inside a task directory; `log` names the task log
    pub fn file_path(&self, pid: &str, file: &str) -> GatewayResult<PathBuf> {
        let dir = self.task_dir(pid)?;
        let name = if file == "log" { LOG_FILE } else { file };
        let plain = !name.is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        if !plain {
            return Err(GatewayError::not_found(format!("file {}", file)));
        }
        let path = dir.join(name);
        if !path.is_file() {
            return Err(GatewayError::not_found(format!("file {}", file)));
        }
        Ok(path)
    }

    /// Append one `<status> <info>` line to the task log
    ///
    /// Opens the log with its `createTime` marker on first use. Terminal
    /// entries also write the closing `lastTime` marker. Does nothing once
    /// the log is closed.
    pub fn append_log(
        &self,
        pid: &str,
        create_time: DateTime<Utc>,
        status: &str,
        info: &Value,
        terminal: bool,
    ) -> GatewayResult<()> {
        let path = self.task_dir(pid)?.join(LOG_FILE);

        if path.exists() {
            let existing = fs::read_to_string(&path)?;
            if existing.contains(CLOSING_MARKER) {
                warn!(pid, status, "Task log already closed; dropping entry");
                return Ok(());
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "createTime: {}", create_time.to_rfc3339())?;
            writeln!(file, "{}", RULE)?;
        }

        let message = match info {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        writeln!(file, "{} {}", status, message)?;

        if terminal {
            writeln!(file, "{}", RULE)?;
            writeln!(file, "{} {}", CLOSING_MARKER, Utc::now().to_rfc3339())?;
        }
        Ok(())
    }
}
