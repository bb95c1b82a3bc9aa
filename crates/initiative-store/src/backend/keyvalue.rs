// ABOUTME: Quota-bounded string key-value backend, one slot per record keyed by type and name.
// ABOUTME: Optionally flushes the whole slot map to a JSON file with atomic replacement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use initiative_core::{Record, RecordKind};
use tokio::sync::Mutex;

use super::{BackendKind, StorageBackend};
use crate::atomic::write_atomic;
use crate::error::StorageError;

/// Default byte budget, matching the usual per-origin browser allowance.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

const KEY_PREFIX: &str = "initiative";
const PROBE_KEY: &str = "initiative:__probe__";

/// A flat string-to-string store. Enumeration is a prefix scan over every
/// slot, which is fine for the tens to hundreds of records a tracker holds.
pub struct KeyValueBackend {
    slots: Mutex<BTreeMap<String, String>>,
    quota_bytes: usize,
    path: Option<PathBuf>,
}

impl KeyValueBackend {
    /// An in-memory store with the default quota.
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            quota_bytes,
            path: None,
        }
    }

    /// A store persisted to `path`, loaded on `init` and rewritten after
    /// every mutation.
    pub fn persistent(path: &Path, quota_bytes: usize) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            quota_bytes,
            path: Some(path.to_path_buf()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bytes currently used, counted as key plus value lengths.
    pub async fn usage_bytes(&self) -> usize {
        usage(&*self.slots.lock().await)
    }

    async fn flush(&self, slots: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(path) = &self.path {
            let json = serde_json::to_vec(slots)?;
            write_atomic(path, &json).await?;
        }
        Ok(())
    }
}

impl Default for KeyValueBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_key(kind: RecordKind, name: &str) -> String {
    format!("{KEY_PREFIX}:{}:{name}", kind.as_str())
}

fn kind_prefix(kind: RecordKind) -> String {
    format!("{KEY_PREFIX}:{}:", kind.as_str())
}

fn usage(slots: &BTreeMap<String, String>) -> usize {
    slots.iter().map(|(k, v)| k.len() + v.len()).sum()
}

#[async_trait]
impl StorageBackend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn init(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let loaded: BTreeMap<String, String> = serde_json::from_str(&contents)?;
                tracing::info!(
                    "key-value store loaded {} slots from {}",
                    loaded.len(),
                    path.display()
                );
                *self.slots.lock().await = loaded;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("key-value store file {} does not exist yet", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn is_available(&self) -> bool {
        if let Some(parent) = self.path.as_deref().and_then(Path::parent)
            && tokio::fs::create_dir_all(parent).await.is_err()
        {
            return false;
        }

        let mut slots = self.slots.lock().await;
        if usage(&slots) + PROBE_KEY.len() + 1 > self.quota_bytes {
            return false;
        }
        slots.insert(PROBE_KEY.to_string(), "1".to_string());
        slots.remove(PROBE_KEY);
        true
    }

    async fn save_data(
        &self,
        kind: RecordKind,
        name: &str,
        data: &Record,
    ) -> Result<(), StorageError> {
        let key = slot_key(kind, name);
        let value = data.to_json()?;

        let mut slots = self.slots.lock().await;
        let existing = slots.get(&key).map(|v| key.len() + v.len()).unwrap_or(0);
        let projected = usage(&slots) - existing + key.len() + value.len();
        if projected > self.quota_bytes {
            return Err(StorageError::QuotaExceeded(format!(
                "writing {key} needs {projected} bytes, quota is {}",
                self.quota_bytes
            )));
        }

        let mut next = slots.clone();
        next.insert(key, value);
        self.flush(&next).await?;
        *slots = next;
        Ok(())
    }

    async fn load_data(&self, kind: RecordKind, name: &str) -> Result<Record, StorageError> {
        let slots = self.slots.lock().await;
        let value = slots
            .get(&slot_key(kind, name))
            .ok_or_else(|| StorageError::not_found(kind, name))?;
        Ok(Record::from_json(value)?)
    }

    async fn delete_data(&self, kind: RecordKind, name: &str) -> Result<(), StorageError> {
        let key = slot_key(kind, name);
        let mut slots = self.slots.lock().await;
        if !slots.contains_key(&key) {
            return Ok(());
        }
        let mut next = slots.clone();
        next.remove(&key);
        self.flush(&next).await?;
        *slots = next;
        Ok(())
    }

    async fn get_all_data(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError> {
        let prefix = kind_prefix(kind);
        let slots = self.slots.lock().await;
        slots
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, value)| Record::from_json(value).map_err(StorageError::from))
            .collect()
    }

    async fn cleanup(&self) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().await;
        let prefix = format!("{KEY_PREFIX}:");
        let mut next = slots.clone();
        next.retain(|key, _| !key.starts_with(&prefix));
        self.flush(&next).await?;
        *slots = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(name: &str, payload: serde_json::Value) -> Record {
        Record::stamp(name, payload, "1.0.0", false).unwrap()
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let backend = KeyValueBackend::new();
        backend.init().await.unwrap();

        let rec = record("goblin-ambush", json!({"combatants": [], "round": 1}));
        backend
            .save_data(RecordKind::Encounter, "goblin-ambush", &rec)
            .await
            .unwrap();

        let loaded = backend
            .load_data(RecordKind::Encounter, "goblin-ambush")
            .await
            .unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn overwrite_keeps_single_slot() {
        let backend = KeyValueBackend::new();
        backend
            .save_data(RecordKind::Player, "aria", &record("aria", json!({"level": 1})))
            .await
            .unwrap();
        backend
            .save_data(RecordKind::Player, "aria", &record("aria", json!({"level": 2})))
            .await
            .unwrap();

        let all = backend.get_all_data(RecordKind::Player).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload["level"], json!(2));
    }

    #[tokio::test]
    async fn missing_key_is_not_found_and_delete_is_noop() {
        let backend = KeyValueBackend::new();
        let err = backend
            .load_data(RecordKind::Monster, "tarrasque")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        backend
            .delete_data(RecordKind::Monster, "tarrasque")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enumeration_is_scoped_by_kind() {
        let backend = KeyValueBackend::new();
        backend
            .save_data(RecordKind::Monster, "ogre", &record("ogre", json!({"cr": 2})))
            .await
            .unwrap();
        backend
            .save_data(RecordKind::Player, "ogre", &record("ogre", json!({"level": 3})))
            .await
            .unwrap();

        let monsters = backend.get_all_data(RecordKind::Monster).await.unwrap();
        assert_eq!(monsters.len(), 1);
        assert_eq!(monsters[0].payload["cr"], json!(2));
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let backend = KeyValueBackend::with_quota(200);
        let big = record("hoard", json!({"coins": "x".repeat(400)}));
        let err = backend
            .save_data(RecordKind::Settings, "hoard", &big)
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded(), "expected quota error, got {err}");
        assert_eq!(backend.usage_bytes().await, 0);
    }

    #[tokio::test]
    async fn cleanup_removes_every_kind() {
        let backend = KeyValueBackend::new();
        backend
            .save_data(RecordKind::Monster, "ogre", &record("ogre", json!({})))
            .await
            .unwrap();
        backend
            .save_data(RecordKind::Template, "patrol", &record("patrol", json!({})))
            .await
            .unwrap();

        backend.cleanup().await.unwrap();

        assert!(backend.get_all_data(RecordKind::Monster).await.unwrap().is_empty());
        assert!(backend.get_all_data(RecordKind::Template).await.unwrap().is_empty());
        assert_eq!(backend.usage_bytes().await, 0);
    }

    #[tokio::test]
    async fn availability_probe_leaves_no_trace() {
        let backend = KeyValueBackend::new();
        assert!(backend.is_available().await);
        assert_eq!(backend.usage_bytes().await, 0);

        let full = KeyValueBackend::with_quota(4);
        assert!(!full.is_available().await);
    }

    #[tokio::test]
    async fn persistent_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv").join("slots.json");

        let backend = KeyValueBackend::persistent(&path, DEFAULT_QUOTA_BYTES);
        assert!(backend.is_available().await);
        backend.init().await.unwrap();
        backend
            .save_data(RecordKind::Encounter, "crypt", &record("crypt", json!({"round": 5})))
            .await
            .unwrap();
        drop(backend);

        let reopened = KeyValueBackend::persistent(&path, DEFAULT_QUOTA_BYTES);
        reopened.init().await.unwrap();
        let loaded = reopened
            .load_data(RecordKind::Encounter, "crypt")
            .await
            .unwrap();
        assert_eq!(loaded.payload["round"], json!(5));
    }

    #[tokio::test]
    async fn failed_flush_leaves_slots_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slots.json");
        let backend = KeyValueBackend::persistent(&path, DEFAULT_QUOTA_BYTES);
        backend.init().await.unwrap();
        backend
            .save_data(RecordKind::Player, "brom", &record("brom", json!({"hp": 30})))
            .await
            .unwrap();

        // A directory where the slot file belongs makes every flush fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = backend
            .save_data(RecordKind::Encounter, "crypt", &record("crypt", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(backend
            .load_data(RecordKind::Encounter, "crypt")
            .await
            .unwrap_err()
            .is_not_found());

        backend
            .save_data(RecordKind::Player, "brom", &record("brom", json!({"hp": 1})))
            .await
            .unwrap_err();
        backend.delete_data(RecordKind::Player, "brom").await.unwrap_err();
        backend.cleanup().await.unwrap_err();

        let kept = backend.load_data(RecordKind::Player, "brom").await.unwrap();
        assert_eq!(kept.payload["hp"], json!(30));
    }
}
