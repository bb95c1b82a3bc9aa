// ABOUTME: Configuration loading for the save manager from INITIATIVE_* environment variables.
// ABOUTME: Validates backend names and numeric limits, then wires the configured backends together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use initiative_core::ImportPolicy;
use thiserror::Error;

use crate::backend::BackendKind;
use crate::backend::directory::{DirectoryBackend, DirectoryGrant, FixedGrant};
use crate::backend::document::DocumentBackend;
use crate::backend::keyvalue::{DEFAULT_QUOTA_BYTES, KeyValueBackend};
use crate::error::StorageError;
use crate::manager::{SaveManager, SaveSettings};

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid storage backend: {value}")]
    InvalidBackend { var: &'static str, value: String },

    #[error("{var} must be a non-negative integer, got `{value}`")]
    InvalidNumber { var: &'static str, value: String },

    #[error("INITIATIVE_IMPORT_POLICY must be `strict` or `infer`, got `{0}`")]
    InvalidImportPolicy(String),

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}

/// Persistence configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SaveConfig {
    pub home: PathBuf,
    pub backend: BackendKind,
    pub fallback: Option<BackendKind>,
    /// Root for the directory backend; without it that backend is
    /// unavailable.
    pub records_dir: Option<PathBuf>,
    pub kv_quota_bytes: usize,
    pub settings: SaveSettings,
}

impl SaveConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - INITIATIVE_HOME: data directory (default: ~/.initiative)
    /// - INITIATIVE_BACKEND: keyvalue, document or directory (default: document)
    /// - INITIATIVE_FALLBACK_BACKEND: used when the default is unavailable (optional)
    /// - INITIATIVE_RECORDS_DIR: root for the directory backend (optional)
    /// - INITIATIVE_AUTOSAVE_SECS: auto-save interval, 0 disables (default: 60)
    /// - INITIATIVE_MAX_AUTOSAVES: auto-saves kept (default: 5)
    /// - INITIATIVE_BACKUP_SECS: backup interval, 0 disables (default: 3600)
    /// - INITIATIVE_MAX_BACKUPS: backups kept (default: 10)
    /// - INITIATIVE_KV_QUOTA_BYTES: key-value store quota (default: 5 MiB)
    /// - INITIATIVE_IMPORT_POLICY: strict or infer (default: strict)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let home = get("INITIATIVE_HOME").map(PathBuf::from).unwrap_or_else(|| {
            get("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".initiative")
        });

        let backend = match get("INITIATIVE_BACKEND") {
            Some(value) => parse_backend("INITIATIVE_BACKEND", value)?,
            None => BackendKind::Document,
        };
        let fallback = get("INITIATIVE_FALLBACK_BACKEND")
            .map(|value| parse_backend("INITIATIVE_FALLBACK_BACKEND", value))
            .transpose()?;

        let records_dir = get("INITIATIVE_RECORDS_DIR").map(PathBuf::from);

        let defaults = SaveSettings::default();
        let auto_save_secs = parse_number(&get, "INITIATIVE_AUTOSAVE_SECS", 60)?;
        let backup_secs = parse_number(&get, "INITIATIVE_BACKUP_SECS", 3600)?;
        let max_auto_saves =
            parse_number(&get, "INITIATIVE_MAX_AUTOSAVES", defaults.max_auto_saves as u64)?;
        let max_backups = parse_number(&get, "INITIATIVE_MAX_BACKUPS", defaults.max_backups as u64)?;
        let kv_quota_bytes =
            parse_number(&get, "INITIATIVE_KV_QUOTA_BYTES", DEFAULT_QUOTA_BYTES as u64)?;

        if max_auto_saves == 0 {
            return Err(ConfigError::ZeroLimit("INITIATIVE_MAX_AUTOSAVES"));
        }
        if max_backups == 0 {
            return Err(ConfigError::ZeroLimit("INITIATIVE_MAX_BACKUPS"));
        }
        if kv_quota_bytes == 0 {
            return Err(ConfigError::ZeroLimit("INITIATIVE_KV_QUOTA_BYTES"));
        }

        let import_policy = match get("INITIATIVE_IMPORT_POLICY") {
            Some(value) => value
                .parse::<ImportPolicy>()
                .map_err(|_| ConfigError::InvalidImportPolicy(value))?,
            None => ImportPolicy::Strict,
        };

        Ok(Self {
            home,
            backend,
            fallback,
            records_dir,
            kv_quota_bytes: kv_quota_bytes as usize,
            settings: SaveSettings {
                max_auto_saves: max_auto_saves as usize,
                max_backups: max_backups as usize,
                auto_save_interval: Duration::from_secs(auto_save_secs),
                backup_interval: Duration::from_secs(backup_secs),
                import_policy,
                ..defaults
            },
        })
    }

    /// Build a save manager with all three backends registered: the
    /// key-value store persisted to `<home>/keyvalue.json`, the document store
    /// at `<home>/initiative.db`, and the directory store at `records_dir`.
    pub async fn build_manager(&self) -> Result<SaveManager, StorageError> {
        let grant = self
            .records_dir
            .as_ref()
            .map(|dir| Arc::new(FixedGrant::new(dir)) as Arc<dyn DirectoryGrant>);

        let mut builder = SaveManager::builder()
            .backend(Arc::new(KeyValueBackend::persistent(
                &self.home.join("keyvalue.json"),
                self.kv_quota_bytes,
            )))
            .backend(Arc::new(DocumentBackend::open(&self.home.join("initiative.db"))))
            .backend(Arc::new(DirectoryBackend::new(grant)))
            .default_backend(self.backend)
            .settings(self.settings.clone());
        if let Some(fallback) = self.fallback {
            builder = builder.fallback_backend(fallback);
        }
        builder.build().await
    }
}

fn parse_backend(var: &'static str, value: String) -> Result<BackendKind, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidBackend { var, value })
}

fn parse_number<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(default),
    }
}
