// ABOUTME: Save lifecycle events and the SaveListener capability listeners implement.
// ABOUTME: Listener failures and panics are logged and isolated so they never break an operation.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use initiative_core::RecordKind;
use serde_json::Value;

use crate::error::StorageError;

/// Error type listeners may return from their handler.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Something that happened to a record or to the save schedules. Failure
/// variants carry the original error.
#[derive(Debug, Clone)]
pub enum SaveEvent {
    Saved { kind: RecordKind, name: String },
    SaveFailed { kind: RecordKind, name: String, error: Arc<StorageError> },
    Loaded { kind: RecordKind, name: String },
    LoadFailed { kind: RecordKind, name: String, error: Arc<StorageError> },
    Deleted { kind: RecordKind, name: String },
    DeleteFailed { kind: RecordKind, name: String, error: Arc<StorageError> },
    ListFailed { kind: RecordKind, error: Arc<StorageError> },
    AutoSaved { name: String },
    AutoSaveFailed { error: Arc<StorageError> },
    BackupCreated { name: String, records: usize },
    BackupFailed { error: Arc<StorageError> },
    BackupRestored { name: String, restored: usize },
    RestoreFailed { name: String, restored: usize, error: Arc<StorageError> },
    Imported { kind: RecordKind, name: String },
    CollectionImported { records: usize },
    ImportFailed { error: Arc<StorageError> },
    Exported { kind: RecordKind, name: Option<String> },
    ExportFailed { kind: RecordKind, error: Arc<StorageError> },
}

impl SaveEvent {
    /// Event name in the `encounterSaved` / `autoSaveFailed` style.
    pub fn name(&self) -> String {
        match self {
            SaveEvent::Saved { kind, .. } => format!("{kind}Saved"),
            SaveEvent::SaveFailed { kind, .. } => format!("{kind}SaveFailed"),
            SaveEvent::Loaded { kind, .. } => format!("{kind}Loaded"),
            SaveEvent::LoadFailed { kind, .. } => format!("{kind}LoadFailed"),
            SaveEvent::Deleted { kind, .. } => format!("{kind}Deleted"),
            SaveEvent::DeleteFailed { kind, .. } => format!("{kind}DeleteFailed"),
            SaveEvent::ListFailed { kind, .. } => format!("{kind}ListFailed"),
            SaveEvent::AutoSaved { .. } => "autoSaved".to_string(),
            SaveEvent::AutoSaveFailed { .. } => "autoSaveFailed".to_string(),
            SaveEvent::BackupCreated { .. } => "backupCreated".to_string(),
            SaveEvent::BackupFailed { .. } => "backupFailed".to_string(),
            SaveEvent::BackupRestored { .. } => "backupRestored".to_string(),
            SaveEvent::RestoreFailed { .. } => "restoreFailed".to_string(),
            SaveEvent::Imported { .. } => "recordImported".to_string(),
            SaveEvent::CollectionImported { .. } => "collectionImported".to_string(),
            SaveEvent::ImportFailed { .. } => "importFailed".to_string(),
            SaveEvent::Exported { .. } => "recordExported".to_string(),
            SaveEvent::ExportFailed { .. } => "exportFailed".to_string(),
        }
    }

    pub fn error(&self) -> Option<&StorageError> {
        match self {
            SaveEvent::SaveFailed { error, .. }
            | SaveEvent::LoadFailed { error, .. }
            | SaveEvent::DeleteFailed { error, .. }
            | SaveEvent::ListFailed { error, .. }
            | SaveEvent::AutoSaveFailed { error }
            | SaveEvent::BackupFailed { error }
            | SaveEvent::RestoreFailed { error, .. }
            | SaveEvent::ImportFailed { error }
            | SaveEvent::ExportFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error().is_some()
    }
}

/// A subscriber to save events. It may also supply the application's
/// current state for auto-saves.
pub trait SaveListener: Send + Sync {
    fn on_save_event(&self, event: &SaveEvent) -> Result<(), ListenerError>;

    /// A serializable snapshot of the current application state, if this
    /// listener owns one.
    fn current_state(&self) -> Option<Value> {
        None
    }
}

/// Adapts a plain closure into a listener.
pub struct FnListener<F>(pub F);

impl<F> SaveListener for FnListener<F>
where
    F: Fn(&SaveEvent) + Send + Sync,
{
    fn on_save_event(&self, event: &SaveEvent) -> Result<(), ListenerError> {
        (self.0)(event);
        Ok(())
    }
}

/// Handle returned on registration, used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    inner: RwLock<ListenerTable>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn SaveListener>)>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn SaveListener>) -> ListenerId {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = ListenerId(table.next_id);
        table.next_id += 1;
        table.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = table.entries.len();
        table.entries.retain(|(entry_id, _)| *entry_id != id);
        table.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Copy out the current listeners so none are invoked under the lock;
    /// a listener may register or remove listeners from its handler.
    fn snapshot(&self) -> Vec<Arc<dyn SaveListener>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    /// Deliver `event` to every listener. Errors and panics are logged.
    pub(crate) fn notify(&self, event: &SaveEvent) {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_save_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("save listener failed on {}: {}", event.name(), e);
                }
                Err(_) => {
                    tracing::warn!("save listener panicked on {}", event.name());
                }
            }
        }
    }

    /// The first current-state snapshot any listener offers.
    pub(crate) fn current_state(&self) -> Option<Value> {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener.current_state())) {
                Ok(Some(state)) => return Some(state),
                Ok(None) => {}
                Err(_) => tracing::warn!("state provider panicked; trying the next listener"),
            }
        }
        None
    }
}
