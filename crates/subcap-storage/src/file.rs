//! JSON-file backed durable store
//!
//! The whole map lives in one JSON object. Writes go to a sibling temp file
//! that is then renamed over the original, so a crash mid-write leaves the
//! previous contents intact.

use anyhow::Context;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use subcap_core::{SyncError, SyncResult};
use tokio::sync::Mutex;

use crate::adapter::StorageAdapter;

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (without creating) a store at `path`; `~/` is expanded.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: expand_tilde(path.as_ref()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> SyncResult<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(SyncError::Storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(SyncError::Storage(format!(
                "parsing {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, map: &Map<String, Value>) -> SyncResult<()> {
        self.write_atomic(map)
            .await
            .map_err(|e| SyncError::Storage(format!("{e:#}")))
    }

    async fn write_atomic(&self, map: &Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating dir: {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(map).context("serializing store")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl StorageAdapter for FileStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let map = self.load().await?;
        Ok(map.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&map).await
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.save(&map).await?;
        }
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
