// ABOUTME: SaveManager orchestrates storage backends: metadata stamping, auto-save, backups, and restore.
// ABOUTME: Also handles import/export documents and notifies listeners of every save lifecycle event.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use initiative_core::{
    ImportPolicy, Record, RecordBundle, RecordKind, RecordSummary, parse_record,
    sort_newest_first, tag_export,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use ulid::{Generator, Ulid};

use crate::backend::{BackendKind, StorageBackend};
use crate::error::StorageError;
use crate::events::{FnListener, ListenerId, Listeners, SaveEvent, SaveListener};

/// Name under which `save_settings` stores the settings record.
pub const SETTINGS_NAME: &str = "settings";

const AUTOSAVE_PREFIX: &str = "autosave-";
const BACKUP_PREFIX: &str = "backup-";

/// Tunables for metadata and the unattended schedules.
#[derive(Debug, Clone)]
pub struct SaveSettings {
    /// Version string stamped into every record's meta.
    pub version: String,
    pub max_auto_saves: usize,
    pub max_backups: usize,
    pub auto_save_interval: Duration,
    pub backup_interval: Duration,
    pub import_policy: ImportPolicy,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_auto_saves: 5,
            max_backups: 10,
            auto_save_interval: Duration::from_secs(60),
            backup_interval: Duration::from_secs(3600),
            import_policy: ImportPolicy::Strict,
        }
    }
}

/// Collects backends and settings, then probes and initializes the
/// backends in `build`.
pub struct SaveManagerBuilder {
    backends: Vec<Arc<dyn StorageBackend>>,
    default_backend: Option<BackendKind>,
    fallback_backend: Option<BackendKind>,
    settings: SaveSettings,
}

impl SaveManagerBuilder {
    /// Register a backend. A later backend of the same kind replaces an
    /// earlier one.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// The backend used when an operation names none. Defaults to the first
    /// registered backend.
    pub fn default_backend(mut self, kind: BackendKind) -> Self {
        self.default_backend = Some(kind);
        self
    }

    /// Used as the default when the preferred default is unavailable.
    pub fn fallback_backend(mut self, kind: BackendKind) -> Self {
        self.fallback_backend = Some(kind);
        self
    }

    pub fn settings(mut self, settings: SaveSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Probe every backend and initialize the available ones. Backends that
    /// report unavailable, or fail to initialize, are recorded and never
    /// used.
    pub async fn build(self) -> Result<SaveManager, StorageError> {
        let first = self
            .backends
            .first()
            .map(|b| b.kind())
            .ok_or_else(|| StorageError::Unavailable("no storage backends registered".to_string()))?;

        let mut backends = HashMap::new();
        let mut unavailable = HashMap::new();

        for backend in self.backends {
            let kind = backend.kind();
            if !backend.is_available().await {
                tracing::warn!("storage backend {} is not available in this environment", kind);
                unavailable.insert(kind, "not available in this environment".to_string());
                backends.remove(&kind);
                continue;
            }
            match backend.init().await {
                Ok(()) => {
                    tracing::info!("storage backend {} initialized", kind);
                    unavailable.remove(&kind);
                    backends.insert(kind, backend);
                }
                Err(e) => {
                    tracing::error!("storage backend {} failed to initialize: {}", kind, e);
                    unavailable.insert(kind, format!("failed to initialize: {e}"));
                    backends.remove(&kind);
                }
            }
        }

        let preferred = self.default_backend.unwrap_or(first);
        let default_backend = match self.fallback_backend {
            Some(fallback) if !backends.contains_key(&preferred) && backends.contains_key(&fallback) => {
                tracing::warn!(
                    "default backend {} unavailable, falling back to {}",
                    preferred,
                    fallback
                );
                fallback
            }
            _ => preferred,
        };

        Ok(SaveManager {
            backends,
            unavailable,
            default_backend,
            settings: self.settings,
            listeners: Listeners::default(),
            names: Mutex::new(Generator::new()),
        })
    }
}

/// Orchestrates record persistence over a table of backends.
///
/// Public operations emit a `*Failed` event and return the error when a
/// backend call fails. The unattended auto-save and backup cycles only emit
/// and log, since no caller is waiting on them.
pub struct SaveManager {
    backends: HashMap<BackendKind, Arc<dyn StorageBackend>>,
    unavailable: HashMap<BackendKind, String>,
    default_backend: BackendKind,
    settings: SaveSettings,
    listeners: Listeners,
    names: Mutex<Generator>,
}

impl SaveManager {
    pub fn builder() -> SaveManagerBuilder {
        SaveManagerBuilder {
            backends: Vec::new(),
            default_backend: None,
            fallback_backend: None,
            settings: SaveSettings::default(),
        }
    }

    pub fn settings(&self) -> &SaveSettings {
        &self.settings
    }

    pub fn default_backend(&self) -> BackendKind {
        self.default_backend
    }

    pub fn is_backend_available(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    // -- listeners --

    pub fn add_listener(&self, listener: Arc<dyn SaveListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Register a closure as a listener.
    pub fn add_listener_fn<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&SaveEvent) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(FnListener(f)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&self, event: SaveEvent) {
        tracing::debug!("save event {}", event.name());
        self.listeners.notify(&event);
    }

    // -- backend resolution --

    fn resolve(&self, backend: Option<BackendKind>) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let kind = backend.unwrap_or(self.default_backend);
        if let Some(backend) = self.backends.get(&kind) {
            return Ok(Arc::clone(backend));
        }
        Err(StorageError::Unavailable(match self.unavailable.get(&kind) {
            Some(reason) => format!("{kind} backend is {reason}"),
            None => format!("{kind} backend is not registered"),
        }))
    }

    /// A fresh, monotonically increasing name with the given prefix.
    fn next_name(&self, prefix: &str) -> String {
        let id = self
            .names
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok())
            .unwrap_or_else(Ulid::new);
        format!("{prefix}{}", id.to_string().to_ascii_lowercase())
    }

    // -- generic record operations --

    async fn put(
        &self,
        kind: RecordKind,
        name: &str,
        payload: Value,
        backend: Option<BackendKind>,
        is_auto_save: bool,
    ) -> Result<Record, StorageError> {
        let record = Record::stamp(name, payload, &self.settings.version, is_auto_save)?;
        let backend = self.resolve(backend)?;
        backend.save_data(kind, name, &record).await?;
        tracing::debug!("saved {} `{}` to {}", kind, name, backend.kind());
        Ok(record)
    }

    async fn list(
        &self,
        kind: RecordKind,
        backend: Option<BackendKind>,
    ) -> Result<Vec<Record>, StorageError> {
        let mut records = self.resolve(backend)?.get_all_data(kind).await?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Stamp `payload` with meta and save it under `(kind, name)`. Returns
    /// the stamped record.
    pub async fn save_data(
        &self,
        kind: RecordKind,
        name: &str,
        payload: Value,
        backend: Option<BackendKind>,
    ) -> Result<Record, StorageError> {
        match self.put(kind, name, payload, backend, false).await {
            Ok(record) => {
                self.emit(SaveEvent::Saved {
                    kind,
                    name: name.to_string(),
                });
                Ok(record)
            }
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::SaveFailed {
                    kind,
                    name: name.to_string(),
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    pub async fn load_data(
        &self,
        kind: RecordKind,
        name: &str,
        backend: Option<BackendKind>,
    ) -> Result<Record, StorageError> {
        let result = match self.resolve(backend) {
            Ok(backend) => backend.load_data(kind, name).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => {
                self.emit(SaveEvent::Loaded {
                    kind,
                    name: name.to_string(),
                });
                Ok(record)
            }
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::LoadFailed {
                    kind,
                    name: name.to_string(),
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    pub async fn delete_data(
        &self,
        kind: RecordKind,
        name: &str,
        backend: Option<BackendKind>,
    ) -> Result<(), StorageError> {
        let result = match self.resolve(backend) {
            Ok(backend) => backend.delete_data(kind, name).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.emit(SaveEvent::Deleted {
                    kind,
                    name: name.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::DeleteFailed {
                    kind,
                    name: name.to_string(),
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    /// Every record of `kind`, newest first.
    pub async fn get_all_data(
        &self,
        kind: RecordKind,
        backend: Option<BackendKind>,
    ) -> Result<Vec<Record>, StorageError> {
        match self.list(kind, backend).await {
            Ok(records) => Ok(records),
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::ListFailed {
                    kind,
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    /// Listing summaries for `kind`, newest first.
    pub async fn summaries(
        &self,
        kind: RecordKind,
        backend: Option<BackendKind>,
    ) -> Result<Vec<RecordSummary>, StorageError> {
        Ok(self
            .get_all_data(kind, backend)
            .await?
            .iter()
            .map(|r| r.summary(kind))
            .collect())
    }

    /// Remove every record from a backend.
    pub async fn cleanup(&self, backend: Option<BackendKind>) -> Result<(), StorageError> {
        let backend = self.resolve(backend)?;
        backend.cleanup().await?;
        tracing::info!("cleared every record from {}", backend.kind());
        Ok(())
    }

    // -- typed convenience --

    pub async fn save_encounter(&self, name: &str, payload: Value) -> Result<Record, StorageError> {
        self.save_data(RecordKind::Encounter, name, payload, None).await
    }

    pub async fn load_encounter(&self, name: &str) -> Result<Record, StorageError> {
        self.load_data(RecordKind::Encounter, name, None).await
    }

    pub async fn delete_encounter(&self, name: &str) -> Result<(), StorageError> {
        self.delete_data(RecordKind::Encounter, name, None).await
    }

    /// Saved encounters, newest first. Auto-saves are listed separately by
    /// `get_auto_saves`.
    pub async fn get_all_encounters(&self) -> Result<Vec<RecordSummary>, StorageError> {
        Ok(self
            .summaries(RecordKind::Encounter, None)
            .await?
            .into_iter()
            .filter(|s| !s.is_auto_save)
            .collect())
    }

    pub async fn save_player(&self, name: &str, payload: Value) -> Result<Record, StorageError> {
        self.save_data(RecordKind::Player, name, payload, None).await
    }

    pub async fn load_player(&self, name: &str) -> Result<Record, StorageError> {
        self.load_data(RecordKind::Player, name, None).await
    }

    pub async fn delete_player(&self, name: &str) -> Result<(), StorageError> {
        self.delete_data(RecordKind::Player, name, None).await
    }

    pub async fn get_all_players(&self) -> Result<Vec<RecordSummary>, StorageError> {
        self.summaries(RecordKind::Player, None).await
    }

    pub async fn save_monster(&self, name: &str, payload: Value) -> Result<Record, StorageError> {
        self.save_data(RecordKind::Monster, name, payload, None).await
    }

    pub async fn load_monster(&self, name: &str) -> Result<Record, StorageError> {
        self.load_data(RecordKind::Monster, name, None).await
    }

    pub async fn delete_monster(&self, name: &str) -> Result<(), StorageError> {
        self.delete_data(RecordKind::Monster, name, None).await
    }

    pub async fn get_all_monsters(&self) -> Result<Vec<RecordSummary>, StorageError> {
        self.summaries(RecordKind::Monster, None).await
    }

    pub async fn save_template(&self, name: &str, payload: Value) -> Result<Record, StorageError> {
        self.save_data(RecordKind::Template, name, payload, None).await
    }

    pub async fn load_template(&self, name: &str) -> Result<Record, StorageError> {
        self.load_data(RecordKind::Template, name, None).await
    }

    pub async fn delete_template(&self, name: &str) -> Result<(), StorageError> {
        self.delete_data(RecordKind::Template, name, None).await
    }

    pub async fn get_all_templates(&self) -> Result<Vec<RecordSummary>, StorageError> {
        self.summaries(RecordKind::Template, None).await
    }

    pub async fn save_settings(&self, payload: Value) -> Result<Record, StorageError> {
        self.save_data(RecordKind::Settings, SETTINGS_NAME, payload, None)
            .await
    }

    /// The saved settings, or `None` when nothing has been saved yet.
    pub async fn load_settings(&self) -> Result<Option<Record>, StorageError> {
        match self.load_data(RecordKind::Settings, SETTINGS_NAME, None).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // -- auto-save --

    /// Run one auto-save cycle: snapshot the current state from the first
    /// listener that offers one, save it, and prune old auto-saves. Returns
    /// the saved record, or `None` when there was nothing to save or the
    /// save failed. Never returns an error.
    pub async fn auto_save_now(&self) -> Option<Record> {
        let Some(state) = self.listeners.current_state() else {
            tracing::debug!("auto-save skipped: no current state to save");
            return None;
        };

        let name = self.next_name(AUTOSAVE_PREFIX);
        match self
            .put(RecordKind::Encounter, &name, state, None, true)
            .await
        {
            Ok(record) => {
                tracing::info!("auto-saved current state as {}", name);
                self.emit(SaveEvent::AutoSaved { name });
                self.prune_auto_saves().await;
                Some(record)
            }
            Err(e) => {
                tracing::error!("auto-save failed: {}", e);
                self.emit(SaveEvent::AutoSaveFailed { error: Arc::new(e) });
                None
            }
        }
    }

    /// Auto-saves, newest first.
    pub async fn get_auto_saves(&self) -> Result<Vec<RecordSummary>, StorageError> {
        Ok(self
            .list(RecordKind::Encounter, None)
            .await?
            .iter()
            .filter(|r| r.is_auto_save())
            .map(|r| r.summary(RecordKind::Encounter))
            .collect())
    }

    async fn prune_auto_saves(&self) {
        let result = async {
            let stale: Vec<String> = self
                .get_auto_saves()
                .await?
                .into_iter()
                .skip(self.settings.max_auto_saves)
                .map(|s| s.name)
                .collect();
            let backend = self.resolve(None)?;
            for name in &stale {
                backend.delete_data(RecordKind::Encounter, name).await?;
                tracing::debug!("pruned auto-save {}", name);
            }
            Ok::<_, StorageError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!("pruning auto-saves failed: {}", e);
            self.emit(SaveEvent::AutoSaveFailed { error: Arc::new(e) });
        }
    }

    // -- backups --

    /// Snapshot every non-backup kind into one bundle, save it as a backup
    /// record, and prune old backups.
    pub async fn create_backup(&self) -> Result<Record, StorageError> {
        match self.write_backup().await {
            Ok((record, count)) => {
                tracing::info!("created backup {} with {} records", record.meta.name, count);
                self.emit(SaveEvent::BackupCreated {
                    name: record.meta.name.clone(),
                    records: count,
                });
                if let Err(e) = self.prune_backups().await {
                    tracing::error!("pruning backups failed: {}", e);
                    self.emit(SaveEvent::BackupFailed { error: Arc::new(e) });
                }
                Ok(record)
            }
            Err(e) => {
                tracing::error!("backup failed: {}", e);
                let error = Arc::new(e);
                self.emit(SaveEvent::BackupFailed {
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    /// Scheduled backup: like `create_backup`, but failures are only
    /// reported through events and logs.
    pub async fn backup_now(&self) -> Option<Record> {
        self.create_backup().await.ok()
    }

    async fn write_backup(&self) -> Result<(Record, usize), StorageError> {
        let mut bundle = RecordBundle::new(&self.settings.version);
        for kind in RecordKind::ALL {
            if kind == RecordKind::Backup {
                continue;
            }
            bundle.insert(kind, self.list(kind, None).await?);
        }
        let count = bundle.len();
        let name = self.next_name(BACKUP_PREFIX);
        let record = self
            .put(RecordKind::Backup, &name, bundle.to_value()?, None, false)
            .await?;
        Ok((record, count))
    }

    /// Backups, newest first.
    pub async fn get_backups(&self) -> Result<Vec<RecordSummary>, StorageError> {
        self.summaries(RecordKind::Backup, None).await
    }

    async fn prune_backups(&self) -> Result<(), StorageError> {
        let stale: Vec<String> = self
            .list(RecordKind::Backup, None)
            .await?
            .into_iter()
            .skip(self.settings.max_backups)
            .map(|r| r.meta.name)
            .collect();
        let backend = self.resolve(None)?;
        for name in &stale {
            backend.delete_data(RecordKind::Backup, name).await?;
            tracing::debug!("pruned backup {}", name);
        }
        Ok(())
    }

    /// Re-save every record embedded in the named backup. This is a
    /// sequence of ordinary saves: a failure partway through leaves the
    /// records restored before it in place. Returns how many were restored.
    pub async fn restore_backup(&self, name: &str) -> Result<usize, StorageError> {
        let loaded = async {
            let backend = self.resolve(None)?;
            let record = backend.load_data(RecordKind::Backup, name).await?;
            Ok::<_, StorageError>(RecordBundle::from_value(record.payload_value())?)
        }
        .await;

        let bundle = match loaded {
            Ok(bundle) => bundle,
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::RestoreFailed {
                    name: name.to_string(),
                    restored: 0,
                    error: Arc::clone(&error),
                });
                return Err(Arc::unwrap_or_clone(error));
            }
        };

        match self.save_bundle(&bundle).await {
            Ok(restored) => {
                tracing::info!("restored {} records from backup {}", restored, name);
                self.emit(SaveEvent::BackupRestored {
                    name: name.to_string(),
                    restored,
                });
                Ok(restored)
            }
            Err((restored, e)) => {
                tracing::error!(
                    "restore of backup {} stopped after {} records: {}",
                    name,
                    restored,
                    e
                );
                let error = Arc::new(e);
                self.emit(SaveEvent::RestoreFailed {
                    name: name.to_string(),
                    restored,
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    /// Save each record of a bundle into its own kind, skipping nested
    /// backups. On failure, returns the count saved so far with the error.
    async fn save_bundle(&self, bundle: &RecordBundle) -> Result<usize, (usize, StorageError)> {
        let mut restored = 0;
        for (kind, records) in &bundle.collections {
            if *kind == RecordKind::Backup {
                continue;
            }
            for record in records {
                self.put(
                    *kind,
                    &record.meta.name,
                    record.payload_value(),
                    None,
                    record.is_auto_save(),
                )
                .await
                .map_err(|e| (restored, e))?;
                restored += 1;
            }
        }
        Ok(restored)
    }

    // -- import / export --

    /// One record as a pretty-printed, type-tagged JSON document.
    pub async fn export_record(&self, kind: RecordKind, name: &str) -> Result<String, StorageError> {
        let result = async {
            let record = self.resolve(None)?.load_data(kind, name).await?;
            Ok::<_, StorageError>(serde_json::to_string_pretty(&tag_export(kind, &record)?)?)
        }
        .await;
        self.finish_export(kind, Some(name), result)
    }

    /// Every record of a kind as a `{ <plural>: [...], version, exportDate }`
    /// document.
    pub async fn export_collection(&self, kind: RecordKind) -> Result<String, StorageError> {
        let result = async {
            let mut bundle = RecordBundle::new(&self.settings.version);
            bundle.insert(kind, self.list(kind, None).await?);
            Ok::<_, StorageError>(serde_json::to_string_pretty(&bundle.to_value()?)?)
        }
        .await;
        self.finish_export(kind, None, result)
    }

    fn finish_export(
        &self,
        kind: RecordKind,
        name: Option<&str>,
        result: Result<String, StorageError>,
    ) -> Result<String, StorageError> {
        match result {
            Ok(json) => {
                self.emit(SaveEvent::Exported {
                    kind,
                    name: name.map(str::to_string),
                });
                Ok(json)
            }
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::ExportFailed {
                    kind,
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    /// Import one exported record. The document is fully validated before
    /// anything is written.
    pub async fn import_json(&self, text: &str) -> Result<(RecordKind, Record), StorageError> {
        let result = async {
            let imported = parse_record(text, self.settings.import_policy)?;
            if imported.inferred {
                tracing::warn!(
                    "import of `{}` has no type tag; inferred {} from its shape",
                    imported.name,
                    imported.kind
                );
            }
            let record = self
                .put(
                    imported.kind,
                    &imported.name,
                    Value::Object(imported.payload),
                    None,
                    false,
                )
                .await?;
            Ok::<_, StorageError>((imported.kind, record))
        }
        .await;

        match result {
            Ok((kind, record)) => {
                self.emit(SaveEvent::Imported {
                    kind,
                    name: record.meta.name.clone(),
                });
                Ok((kind, record))
            }
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::ImportFailed {
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    pub async fn import_file(&self, path: &Path) -> Result<(RecordKind, Record), StorageError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => self.import_json(&text).await,
            Err(e) => {
                let error = Arc::new(StorageError::from(e));
                self.emit(SaveEvent::ImportFailed {
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    /// Import a collection export, saving each record into its kind.
    /// Returns how many records were saved.
    pub async fn import_collection_json(&self, text: &str) -> Result<usize, StorageError> {
        let result = async {
            let value: Value = serde_json::from_str(text)?;
            let bundle = RecordBundle::from_value(value)?;
            self.save_bundle(&bundle).await.map_err(|(_, e)| e)
        }
        .await;

        match result {
            Ok(count) => {
                tracing::info!("imported {} records from collection", count);
                self.emit(SaveEvent::CollectionImported { records: count });
                Ok(count)
            }
            Err(e) => {
                let error = Arc::new(e);
                self.emit(SaveEvent::ImportFailed {
                    error: Arc::clone(&error),
                });
                Err(Arc::unwrap_or_clone(error))
            }
        }
    }

    // -- schedules --

    /// Start the auto-save and backup intervals. Both stop when the returned
    /// handle is dropped or stopped. A zero interval disables that schedule.
    pub fn start_schedules(self: &Arc<Self>) -> ScheduleHandle {
        let mut tasks = Vec::new();

        let period = self.settings.auto_save_interval;
        if !period.is_zero() {
            let manager = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    manager.auto_save_now().await;
                }
            }));
        }

        let period = self.settings.backup_interval;
        if !period.is_zero() {
            let manager = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    manager.backup_now().await;
                }
            }));
        }

        tracing::info!(
            "save schedules started (auto-save every {:?}, backup every {:?})",
            self.settings.auto_save_interval,
            self.settings.backup_interval
        );
        ScheduleHandle { tasks }
    }
}

/// Owns the background schedule tasks; dropping it stops them.
pub struct ScheduleHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ScheduleHandle {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
