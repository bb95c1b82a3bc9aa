// ABOUTME: Defines RecordKind, the closed set of record types the tracker persists.
// ABOUTME: Provides string, plural, and parsing conversions used for keys, tables, and file layouts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a string does not name a known record kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown record type: {0}")]
pub struct UnknownKind(pub String);

/// The kinds of record a backend stores. `(kind, name)` identifies a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Encounter,
    Player,
    Monster,
    Settings,
    Template,
    Backup,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Encounter,
        RecordKind::Player,
        RecordKind::Monster,
        RecordKind::Settings,
        RecordKind::Template,
        RecordKind::Backup,
    ];

    /// Singular identifier, used in storage keys, table names and directories.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Encounter => "encounter",
            RecordKind::Player => "player",
            RecordKind::Monster => "monster",
            RecordKind::Settings => "settings",
            RecordKind::Template => "template",
            RecordKind::Backup => "backup",
        }
    }

    /// Plural identifier, used as the collection key in bundle documents.
    pub fn plural(&self) -> &'static str {
        match self {
            RecordKind::Encounter => "encounters",
            RecordKind::Player => "players",
            RecordKind::Monster => "monsters",
            RecordKind::Settings => "settings",
            RecordKind::Template => "templates",
            RecordKind::Backup => "backups",
        }
    }

    pub fn from_plural(plural: &str) -> Option<RecordKind> {
        RecordKind::ALL.into_iter().find(|k| k.plural() == plural)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = UnknownKind;

    /// Accepts the singular or plural form, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower || k.plural() == lower)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}
