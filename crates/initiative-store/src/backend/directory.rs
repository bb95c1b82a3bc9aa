// ABOUTME: Directory backend storing each record as `<root>/<type>/<name>.json`.
// ABOUTME: The root comes from a DirectoryGrant consent provider, asked once per session and cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use initiative_core::{Record, RecordKind};
use tokio::sync::OnceCell;

use super::{BackendKind, StorageBackend};
use crate::atomic::write_atomic;
use crate::error::StorageError;

/// Grants access to a directory. Implementations may prompt the user; a
/// declined prompt is reported as `StorageError::Unavailable`.
#[async_trait]
pub trait DirectoryGrant: Send + Sync {
    /// Whether this environment can grant directory access at all.
    fn is_supported(&self) -> bool {
        true
    }

    async fn request_access(&self) -> Result<PathBuf, StorageError>;
}

/// Grants a fixed, preconfigured directory, creating it if needed.
pub struct FixedGrant {
    root: PathBuf,
}

impl FixedGrant {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DirectoryGrant for FixedGrant {
    async fn request_access(&self) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(self.root.clone())
    }
}

/// A grant provider whose user always declines.
pub struct DeniedGrant;

#[async_trait]
impl DirectoryGrant for DeniedGrant {
    async fn request_access(&self) -> Result<PathBuf, StorageError> {
        Err(StorageError::Unavailable(
            "directory access was declined".to_string(),
        ))
    }
}

/// File-per-record store under a user-granted directory.
pub struct DirectoryBackend {
    grant: Option<Arc<dyn DirectoryGrant>>,
    root: OnceCell<PathBuf>,
}

impl DirectoryBackend {
    /// `None` models an environment without directory access.
    pub fn new(grant: Option<Arc<dyn DirectoryGrant>>) -> Self {
        Self {
            grant,
            root: OnceCell::new(),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::new(Some(Arc::new(FixedGrant::new(root))))
    }

    /// The granted root, requesting consent on first use. A declined request
    /// is not cached, so the next operation asks again.
    async fn root(&self) -> Result<&Path, StorageError> {
        let grant = self.grant.as_ref().ok_or_else(|| {
            StorageError::Unavailable("directory access is not supported here".to_string())
        })?;
        let root = self
            .root
            .get_or_try_init(|| async {
                let root = grant.request_access().await?;
                tracing::info!("directory access granted at {}", root.display());
                Ok::<_, StorageError>(root)
            })
            .await?;
        Ok(root.as_path())
    }

    async fn record_path(&self, kind: RecordKind, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self
            .root()
            .await?
            .join(kind.as_str())
            .join(format!("{}.json", file_stem(name))))
    }
}

/// Map a record name to a file stem. Path separators, reserved characters,
/// control characters, `%` and a leading dot are percent-encoded, so distinct
/// names always map to distinct files.
fn file_stem(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let escape = matches!(c, '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            || c.is_control()
            || (i == 0 && c == '.');
        if escape {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                stem.push_str(&format!("%{byte:02X}"));
            }
        } else {
            stem.push(c);
        }
    }
    stem
}

#[async_trait]
impl StorageBackend for DirectoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Directory
    }

    async fn init(&self) -> Result<(), StorageError> {
        // Consent is requested lazily by the first operation.
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.grant.as_ref().is_some_and(|g| g.is_supported())
    }

    async fn save_data(
        &self,
        kind: RecordKind,
        name: &str,
        data: &Record,
    ) -> Result<(), StorageError> {
        let path = self.record_path(kind, name).await?;
        let json = serde_json::to_vec_pretty(data)?;
        write_atomic(&path, &json).await?;
        Ok(())
    }

    async fn load_data(&self, kind: RecordKind, name: &str) -> Result<Record, StorageError> {
        let path = self.record_path(kind, name).await?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Record::from_json(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(kind, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_data(&self, kind: RecordKind, name: &str) -> Result<(), StorageError> {
        let path = self.record_path(kind, name).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_data(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError> {
        let dir = self.root().await?.join(kind.as_str());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            match Record::from_json(&contents) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("skipping unreadable record file {}: {}", path.display(), e);
                }
            }
        }

        Ok(records)
    }

    async fn cleanup(&self) -> Result<(), StorageError> {
        let root = self.root().await?;
        for kind in RecordKind::ALL {
            match tokio::fs::remove_dir_all(root.join(kind.as_str())).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn record(name: &str, payload: serde_json::Value) -> Record {
        Record::stamp(name, payload, "1.0.0", false).unwrap()
    }

    /// Counts consent prompts and grants a fixed directory.
    struct CountingGrant {
        root: PathBuf,
        prompts: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryGrant for CountingGrant {
        async fn request_access(&self) -> Result<PathBuf, StorageError> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Ok(self.root.clone())
        }
    }

    #[test]
    fn file_stem_escapes_names() {
        assert_eq!(file_stem("goblin-ambush"), "goblin-ambush");
        assert_eq!(file_stem("../etc/passwd"), "%2E.%2Fetc%2Fpasswd");
        assert_eq!(file_stem("a:b*c?"), "a%3Ab%2Ac%3F");
        assert_eq!(file_stem("100%"), "100%25");
        assert_eq!(file_stem("orc_camp"), "orc_camp");
        assert_eq!(file_stem(""), "%");
    }

    #[tokio::test]
    async fn similar_names_stay_distinct() {
        let dir = TempDir::new().unwrap();
        let backend = DirectoryBackend::with_root(dir.path());

        for name in ["orc/camp", "orc_camp", "orc%2Fcamp"] {
            backend
                .save_data(RecordKind::Encounter, name, &record(name, json!({"which": name})))
                .await
                .unwrap();
        }

        for name in ["orc/camp", "orc_camp", "orc%2Fcamp"] {
            let loaded = backend.load_data(RecordKind::Encounter, name).await.unwrap();
            assert_eq!(loaded.meta.name, name);
            assert_eq!(loaded.payload["which"], json!(name));
        }
        assert_eq!(backend.get_all_data(RecordKind::Encounter).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn records_map_to_type_directories() {
        let dir = TempDir::new().unwrap();
        let backend = DirectoryBackend::with_root(dir.path());
        backend.init().await.unwrap();

        backend
            .save_data(RecordKind::Encounter, "bridge", &record("bridge", json!({"round": 2})))
            .await
            .unwrap();

        let path = dir.path().join("encounter").join("bridge.json");
        assert!(path.exists());
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["meta"]["name"], json!("bridge"));

        let loaded = backend.load_data(RecordKind::Encounter, "bridge").await.unwrap();
        assert_eq!(loaded.payload["round"], json!(2));
    }

    #[tokio::test]
    async fn consent_is_requested_once_per_session() {
        let dir = TempDir::new().unwrap();
        let grant = Arc::new(CountingGrant {
            root: dir.path().to_path_buf(),
            prompts: AtomicUsize::new(0),
        });
        let backend = DirectoryBackend::new(Some(grant.clone()));

        backend
            .save_data(RecordKind::Monster, "ogre", &record("ogre", json!({})))
            .await
            .unwrap();
        backend.load_data(RecordKind::Monster, "ogre").await.unwrap();
        backend.get_all_data(RecordKind::Monster).await.unwrap();

        assert_eq!(grant.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_consent_is_unavailable() {
        let backend = DirectoryBackend::new(Some(Arc::new(DeniedGrant)));
        assert!(backend.is_available().await);
        let err = backend
            .load_data(RecordKind::Player, "aria")
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("declined"));
    }

    #[tokio::test]
    async fn missing_capability_is_reported_up_front() {
        let backend = DirectoryBackend::new(None);
        assert!(!backend.is_available().await);
        let err = backend
            .get_all_data(RecordKind::Player)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn not_found_delete_and_enumeration() {
        let dir = TempDir::new().unwrap();
        let backend = DirectoryBackend::with_root(dir.path());

        assert!(backend.get_all_data(RecordKind::Player).await.unwrap().is_empty());
        let err = backend.load_data(RecordKind::Player, "ghost").await.unwrap_err();
        assert!(err.is_not_found());
        backend.delete_data(RecordKind::Player, "ghost").await.unwrap();

        for name in ["aria", "brom"] {
            backend
                .save_data(RecordKind::Player, name, &record(name, json!({"level": 1})))
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("player").join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("player").join("broken.json"), "{not json").unwrap();

        let mut names: Vec<_> = backend
            .get_all_data(RecordKind::Player)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.meta.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["aria", "brom"]);
    }

    #[tokio::test]
    async fn cleanup_removes_type_directories_only() {
        let dir = TempDir::new().unwrap();
        let backend = DirectoryBackend::with_root(dir.path());
        backend
            .save_data(RecordKind::Template, "patrol", &record("patrol", json!({})))
            .await
            .unwrap();
        std::fs::write(dir.path().join("readme.txt"), "keep me").unwrap();

        backend.cleanup().await.unwrap();

        assert!(!dir.path().join("template").exists());
        assert!(dir.path().join("readme.txt").exists());
    }
}
