//! Persisted task records and the progress values folded into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    #[serde(alias = "unzip")]
    Extract,
    #[serde(alias = "archiver")]
    Archive,
    #[serde(alias = "api-proxy")]
    ProxyExport,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Extract => "extract",
            TaskKind::Archive => "archive",
            TaskKind::ProxyExport => "proxy-export",
        }
    }
}

/// Task status; failures are `Finish` with [`TaskNode::error`] set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Finish,
}

/// The `setting.yml` descriptor of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub pid: String,

    #[serde(rename = "type")]
    pub kind: TaskKind,

    /// Owner id of the caller that started the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Snapshot of the task input
    #[serde(default)]
    pub data: Value,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub create_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

impl TaskNode {
    /// A fresh running task with a time-ordered id
    pub fn new(kind: TaskKind, uid: Option<String>, data: Value) -> Self {
        Self {
            pid: uuid::Uuid::now_v7().to_string(),
            kind,
            uid,
            data,
            status: TaskStatus::Running,
            error: None,
            create_time: Utc::now(),
            last_time: None,
            results: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == TaskStatus::Finish
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Returned to the caller as soon as a task is scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTicket {
    pub pid: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
}

/// Extraction progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressResult {
    pub current: u64,
    pub total: u64,
    /// Percent complete, 0 to 100
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Highest percentage a running extraction reports; only completion reports 100
const RUNNING_CEILING: f64 = 99.99;

impl ProgressResult {
    /// Progress after an entry; never 100
    pub fn running(current: u64, total: u64, path: String) -> Self {
        let progress = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64 * 100.0).min(RUNNING_CEILING)
        };
        Self {
            current,
            total,
            progress,
            path: Some(path),
        }
    }

    /// Completion marker
    pub fn done(current: u64, total: u64) -> Self {
        Self {
            current,
            total,
            progress: 100.0,
            path: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.path.is_none() && self.progress >= 100.0
    }
}

/// Entry kind inside an archive request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveNodeKind {
    Directory,
    File,
    /// Inline content stored under `name`
    String,
}

/// One entry of an archive request, or one entry reported while archiving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveNode {
    #[serde(rename = "type")]
    pub kind: ArchiveNodeKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ArchiveNode {
    pub fn directory<N: Into<String>>(name: N) -> Self {
        Self {
            kind: ArchiveNodeKind::Directory,
            name: name.into(),
            content: None,
        }
    }

    pub fn file<N: Into<String>>(name: N) -> Self {
        Self {
            kind: ArchiveNodeKind::File,
            name: name.into(),
            content: None,
        }
    }

    pub fn string<N: Into<String>, C: Into<String>>(name: N, content: C) -> Self {
        Self {
            kind: ArchiveNodeKind::String,
            name: name.into(),
            content: Some(content.into()),
        }
    }
}

/// Archive container format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    Tar,
}

/// How to build an archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveOptions {
    #[serde(default, rename = "type")]
    pub format: ArchiveFormat,

    /// Zip archive comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Gzip a tar archive
    #[serde(default)]
    pub gzip: bool,

    /// Compression level 0-9
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,

    pub content: Vec<ArchiveNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_yaml_shape() {
        let mut node = TaskNode::new(TaskKind::Extract, Some("u1".into()), json!({ "zipfile": "a.zip" }));
        node.results = Some(json!({ "progress": 10.0 }));

        let yaml = serde_yaml::to_string(&node).unwrap();
        assert!(yaml.contains("type: extract"));
        assert!(yaml.contains("status: running"));
        assert!(yaml.contains("createTime:"));
        assert!(!yaml.contains("lastTime"));

        let parsed: TaskNode = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_legacy_kind_names() {
        let kind: TaskKind = serde_json::from_value(json!("unzip")).unwrap();
        assert_eq!(kind, TaskKind::Extract);
        let kind: TaskKind = serde_json::from_value(json!("api-proxy")).unwrap();
        assert_eq!(kind, TaskKind::ProxyExport);
    }

    #[test]
    fn test_running_progress_never_reaches_100() {
        let p = ProgressResult::running(10, 10, "last.txt".into());
        assert!(p.progress < 100.0);
        assert!(!p.is_complete());
        assert!(ProgressResult::done(10, 10).is_complete());
        assert_eq!(ProgressResult::running(0, 0, "empty".into()).progress, 0.0);
    }

    #[test]
    fn test_pids_are_unique() {
        let a = TaskNode::new(TaskKind::Archive, None, Value::Null);
        let b = TaskNode::new(TaskKind::Archive, None, Value::Null);
        assert_ne!(a.pid, b.pid);
        assert_eq!(uuid::Uuid::parse_str(&a.pid).unwrap().get_version_num(), 7);
    }
}
