use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::transport::{ChannelId, MessageId};

/// Highest processed message id per source channel.
///
/// Serialized as a flat JSON object keyed by the decimal channel id. A missing
/// key means nothing has been processed for that channel yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offsets(BTreeMap<String, MessageId>);

impl Offsets {
    pub fn get(&self, channel: ChannelId) -> Option<MessageId> {
        self.0.get(&channel.to_string()).copied()
    }

    /// Raise the offset for `channel` to `id`. Never lowers it.
    /// Returns true when the stored value changed.
    pub fn advance(&mut self, channel: ChannelId, id: MessageId) -> bool {
        match self.0.get_mut(&channel.to_string()) {
            Some(current) if *current >= id => false,
            Some(current) => {
                *current = id;
                true
            }
            None => {
                self.0.insert(channel.to_string(), id);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// JSON file-backed offset map.
///
/// Callers always hand `write` the complete mapping. When a write fails the
/// mapping is kept in memory and returned by `read` until a write succeeds.
pub struct OffsetStore {
    path: PathBuf,
    unsaved: Mutex<Option<Offsets>>,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            unsaved: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the mapping. Never fails: a missing, unreadable or corrupt file
    /// yields an empty mapping so the scanner can always start cold.
    pub async fn read(&self) -> Offsets {
        if let Some(pending) = self.unsaved.lock().await.clone() {
            debug!("Using offsets retained from a failed write");
            return pending;
        }

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Offsets::default(),
            Err(e) => {
                warn!("Failed to read offsets from {}: {}", self.path.display(), e);
                return Offsets::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(offsets) => offsets,
            Err(e) => {
                warn!(
                    "Offsets file {} is corrupt, starting from scratch: {}",
                    self.path.display(),
                    e
                );
                Offsets::default()
            }
        }
    }

    /// Persist the full mapping with a single atomic replace.
    pub async fn write(&self, offsets: &Offsets) -> Result<()> {
        let mut unsaved = self.unsaved.lock().await;
        let result = async {
            let json = serde_json::to_string_pretty(offsets).context("Failed to encode offsets")?;
            super::write_atomic(&self.path, json.as_bytes()).await
        }
        .await;

        match result {
            Ok(()) => {
                *unsaved = None;
                Ok(())
            }
            Err(e) => {
                *unsaved = Some(offsets.clone());
                Err(e).with_context(|| format!("Failed to save offsets to {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_never_decreases() {
        let mut offsets = Offsets::default();
        assert_eq!(offsets.get(100), None);

        assert!(offsets.advance(100, 7));
        assert!(offsets.advance(100, 9));
        assert!(!offsets.advance(100, 3));
        assert_eq!(offsets.get(100), Some(9));
    }

    #[test]
    fn test_json_shape() {
        let mut offsets = Offsets::default();
        offsets.advance(-1001234, 42);
        let json = serde_json::to_string(&offsets).unwrap();
        assert_eq!(json, r#"{"-1001234":42}"#);
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path().join("offset.json"));
        assert!(store.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_empty_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = OffsetStore::new(&path);
        let mut offsets = store.read().await;
        assert!(offsets.is_empty());

        offsets.advance(100, 7);
        offsets.advance(200, 50);
        store.write(&offsets).await.unwrap();

        let reloaded = OffsetStore::new(&path).read().await;
        assert_eq!(reloaded.get(100), Some(7));
        assert_eq!(reloaded.get(200), Some(50));
    }

    #[tokio::test]
    async fn test_failed_write_is_retained_for_next_read() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = OffsetStore::new(blocker.join("offset.json"));

        let mut offsets = Offsets::default();
        offsets.advance(100, 12);
        assert!(store.write(&offsets).await.is_err());

        assert_eq!(store.read().await.get(100), Some(12));
    }
}
