//! # Channel Store
//!
//! Holds an explicit configuration snapshot per channel. A snapshot is loaded
//! from disk on first use and shared (`Arc<Channel>`) by every in-flight
//! request; it is only replaced after an explicit [`ChannelStore::reload`]
//! or, when watching is enabled, after a file under the channel changes.
//!
//! ## On-disk layout
//! ```text
//! <root>/<channel>/api.{yaml,yml,json}         entrance list
//! <root>/<channel>/setting.{yaml,yml,json}     ChannelSetting
//! <root>/<channel>/data/server.{yaml,yml,json} server list override
//! ```

use dashmap::DashMap;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info};

use crate::channel::entrance::Entrance;
use crate::channel::setting::{ChannelSetting, ServerEntry};
use crate::core::error::{GatewayError, GatewayResult};

/// Extensions tried, in order, for every configuration file
const CONFIG_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Loaded configuration of one channel
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub entrances: Vec<Entrance>,
    pub setting: ChannelSetting,
}

/// Snapshot cache of channel configurations
pub struct ChannelStore {
    root: PathBuf,
    snapshots: DashMap<String, Arc<Channel>>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl ChannelStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            snapshots: DashMap::new(),
            watcher: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current snapshot of `name`, loading it on first use
    pub async fn get(&self, name: &str) -> GatewayResult<Arc<Channel>> {
        if let Some(channel) = self.snapshots.get(name) {
            return Ok(Arc::clone(channel.value()));
        }

        let channel = Arc::new(load_channel(&self.root, name).await?);
        debug!(
            channel = %name,
            entrances = channel.entrances.len(),
            "Loaded channel configuration"
        );
        self.snapshots
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&channel));
        Ok(channel)
    }

    /// Drop every snapshot; the next request reloads from disk
    pub fn reload(&self) {
        let dropped = self.snapshots.len();
        self.snapshots.clear();
        info!(dropped, "Channel configuration snapshots cleared");
    }

    /// Drop the snapshot of a single channel
    pub fn invalidate(&self, name: &str) {
        if self.snapshots.remove(name).is_some() {
            info!(channel = %name, "Channel configuration invalidated");
        }
    }

    /// Watch the channel root and invalidate snapshots whose files change
    pub fn watch(self: &Arc<Self>) -> GatewayResult<()> {
        let root = std::fs::canonicalize(&self.root).map_err(|e| {
            GatewayError::config(format!(
                "Failed to resolve channel directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| GatewayError::config(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| GatewayError::config(format!("Failed to watch channel directory: {}", e)))?;

        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
        }

        let store: Weak<ChannelStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    continue;
                }
                let Some(store) = store.upgrade() else { break };
                for path in &event.paths {
                    if let Some(channel) = channel_of(&root, path) {
                        store.invalidate(&channel);
                    }
                }
            }
        });

        info!(root = %self.root.display(), "Watching channel configuration");
        Ok(())
    }
}

/// First path component below `root`
fn channel_of(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()?
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map(str::to_string)
}

/// Channel names double as directory names
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && name != "."
        && name != ".."
}

/// Load one channel from disk
pub async fn load_channel(root: &Path, name: &str) -> GatewayResult<Channel> {
    if !is_valid_channel_name(name) {
        return Err(GatewayError::not_found(format!("channel {}", name)));
    }

    let dir = root.join(name);
    if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(GatewayError::not_found(format!("channel {}", name)));
    }

    let entrances: Vec<Entrance> = read_config_file(&dir, "api").await?.unwrap_or_default();
    for entrance in &entrances {
        entrance.validate().map_err(|e| {
            error!(channel = %name, entrance = %entrance.name, error = %e, "Invalid entrance");
            e
        })?;
    }

    let mut setting: ChannelSetting = read_config_file(&dir, "setting").await?.unwrap_or_default();
    if let Some(servers) = read_config_file::<Vec<ServerEntry>>(&dir.join("data"), "server").await? {
        setting.apply_server_list(servers);
    }

    Ok(Channel {
        name: name.to_string(),
        entrances,
        setting,
    })
}

/// Read `<dir>/<stem>.{yaml,yml,json}`, whichever exists first
pub async fn read_config_file<T: DeserializeOwned>(dir: &Path, stem: &str) -> GatewayResult<Option<T>> {
    for ext in CONFIG_EXTENSIONS {
        let path = dir.join(format!("{}.{}", stem, ext));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let parsed = if ext == "json" {
            serde_json::from_str(&content).map_err(|e| {
                GatewayError::config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                GatewayError::config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };
        return Ok(Some(parsed));
    }
    Ok(None)
}
