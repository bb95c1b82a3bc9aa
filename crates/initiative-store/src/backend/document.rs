// ABOUTME: SQLite document backend with one table per record kind.
// ABOUTME: Schema is created once in init(); every operation is a single atomic statement.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use initiative_core::{Record, RecordKind};
use rusqlite::{Connection, OptionalExtension, params};

use super::{BackendKind, StorageBackend};
use crate::error::StorageError;

enum Location {
    File(PathBuf),
    Memory,
}

/// Transactional document store. Records are stored as JSON text keyed by
/// name in a per-kind table. Operations before `init` fail as unavailable.
pub struct DocumentBackend {
    location: Location,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl DocumentBackend {
    /// A store backed by the database file at `path`.
    pub fn open(path: &Path) -> Self {
        Self {
            location: Location::File(path.to_path_buf()),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// A store that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let guard = conn
                .lock()
                .map_err(|_| StorageError::Unavailable("document store lock poisoned".to_string()))?;
            let conn = guard.as_ref().ok_or_else(|| {
                StorageError::Unavailable("document store is not initialized".to_string())
            })?;
            f(conn)
        })
        .await?
    }
}

fn table(kind: RecordKind) -> String {
    format!("records_{}", kind.as_str())
}

fn create_schema(conn: &Connection) -> Result<(), StorageError> {
    let mut ddl = String::new();
    for kind in RecordKind::ALL {
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );\n",
            table(kind)
        ));
    }
    conn.execute_batch(&ddl)?;
    Ok(())
}

#[async_trait]
impl StorageBackend for DocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn init(&self) -> Result<(), StorageError> {
        let path = match &self.location {
            Location::File(path) => Some(path.clone()),
            Location::Memory => None,
        };
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Unavailable("document store lock poisoned".to_string()))?;
            if guard.is_some() {
                return Ok(());
            }

            let db = match &path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let db = Connection::open(path)?;
                    db.execute_batch("PRAGMA journal_mode=WAL;")?;
                    db
                }
                None => Connection::open_in_memory()?,
            };
            create_schema(&db)?;

            match &path {
                Some(path) => tracing::info!("document store opened at {}", path.display()),
                None => tracing::debug!("in-memory document store opened"),
            }
            *guard = Some(db);
            Ok(())
        })
        .await?
    }

    async fn is_available(&self) -> bool {
        match &self.location {
            Location::Memory => true,
            Location::File(path) => match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    tokio::fs::create_dir_all(parent).await.is_ok()
                }
                _ => true,
            },
        }
    }

    async fn save_data(
        &self,
        kind: RecordKind,
        name: &str,
        data: &Record,
    ) -> Result<(), StorageError> {
        let json = data.to_json()?;
        let name = name.to_string();
        let updated_at = data.meta.date.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (name, data, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET
                        data = excluded.data,
                        updated_at = excluded.updated_at",
                    table(kind)
                ),
                params![name, json, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_data(&self, kind: RecordKind, name: &str) -> Result<Record, StorageError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    &format!("SELECT data FROM {} WHERE name = ?1", table(kind)),
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            match data {
                Some(json) => Ok(Record::from_json(&json)?),
                None => Err(StorageError::not_found(kind, &name)),
            }
        })
        .await
    }

    async fn delete_data(&self, kind: RecordKind, name: &str) -> Result<(), StorageError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                &format!("DELETE FROM {} WHERE name = ?1", table(kind)),
                params![name],
            )?;
            if removed == 0 {
                tracing::debug!("delete of absent {} `{}` ignored", kind, name);
            }
            Ok(())
        })
        .await
    }

    async fn get_all_data(&self, kind: RecordKind) -> Result<Vec<Record>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT data FROM {}", table(kind)))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(Record::from_json(&row?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn cleanup(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            // Rolled back on drop if any delete fails.
            let tx = conn.unchecked_transaction()?;
            for kind in RecordKind::ALL {
                tx.execute(&format!("DELETE FROM {}", table(kind)), [])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
