// ABOUTME: Defines the StorageBackend trait every record store implements, and BackendKind.
// ABOUTME: Submodules provide the key-value, SQLite document, and directory implementations.

pub mod directory;
pub mod document;
pub mod keyvalue;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use initiative_core::{Record, RecordKind};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Identifies a backend implementation in the save manager's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    KeyValue,
    Document,
    Directory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::KeyValue => "keyvalue",
            BackendKind::Document => "document",
            BackendKind::Directory => "directory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyvalue" | "kv" | "localstorage" => Ok(BackendKind::KeyValue),
            "document" | "sqlite" | "indexeddb" => Ok(BackendKind::Document),
            "directory" | "dir" | "filesystem" => Ok(BackendKind::Directory),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Uniform contract for persisting named, typed records.
///
/// `(kind, name)` is unique per backend and writes overwrite silently.
/// `init` must complete before any other operation; `is_available` is a cheap
/// probe that never fails.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// One-time setup (opening files, creating schema).
    async fn init(&self) -> Result<(), StorageError>;

    async fn is_available(&self) -> bool;

    async fn save_data(
        &self,
        kind: RecordKind,
        name: &str,
        data: &Record,
    ) -> Result<(), StorageError>;

    /// Fails with `StorageError::NotFound` when the key is absent.
    async fn load_data(&self, kind: RecordKind, name: &str) -> Result<Record, StorageError>;

    /// Deleting an absent key is not an error.
    async fn delete_data(&self, kind: RecordKind, name: &str) -> Result<(), StorageError>;

    /// Every record of a kind, in no particular order.
    async fn get_all_data(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError>;

    /// Remove every record this backend owns, across all kinds.
    async fn cleanup(&self) -> Result<(), StorageError>;
}
