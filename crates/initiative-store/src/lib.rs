// ABOUTME: Persistence layer for initiative, storing typed records behind interchangeable backends.
// ABOUTME: Provides key-value, SQLite document, and directory backends plus the SaveManager orchestrator.

mod atomic;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;

pub use backend::directory::{DeniedGrant, DirectoryBackend, DirectoryGrant, FixedGrant};
pub use backend::document::DocumentBackend;
pub use backend::keyvalue::{DEFAULT_QUOTA_BYTES, KeyValueBackend};
pub use backend::{BackendKind, StorageBackend};
pub use config::{ConfigError, SaveConfig};
pub use error::StorageError;
pub use events::{FnListener, ListenerError, ListenerId, SaveEvent, SaveListener};
pub use manager::{SETTINGS_NAME, SaveManager, SaveManagerBuilder, SaveSettings, ScheduleHandle};
