// ABOUTME: Parses exported record files back into a kind, name, and payload.
// ABOUTME: Uses the explicit recordType tag, falling back to shape inference only under the Infer policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::bundle::RecordBundle;
use crate::kind::{RecordKind, UnknownKind};
use crate::record::{Record, RecordError};

/// Top-level key carrying the record kind in exported files.
pub const RECORD_TYPE_TAG: &str = "recordType";

/// Errors that can occur while parsing an import file.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("import must be a JSON object")]
    NotAnObject,

    #[error("import has no `recordType` tag and inference is disabled")]
    Untagged,

    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    #[error("import has no record name (expected `meta.name` or `name`)")]
    MissingName,
}

/// How to determine the kind of an untagged import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPolicy {
    /// Untagged files are rejected.
    #[default]
    Strict,
    /// Untagged files are classified by their shape.
    Infer,
}

impl fmt::Display for ImportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportPolicy::Strict => f.write_str("strict"),
            ImportPolicy::Infer => f.write_str("infer"),
        }
    }
}

impl FromStr for ImportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ImportPolicy::Strict),
            "infer" => Ok(ImportPolicy::Infer),
            other => Err(format!("unknown import policy: {other}")),
        }
    }
}

/// A parsed import, ready to be stamped and saved.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRecord {
    pub kind: RecordKind,
    pub name: String,
    pub payload: Map<String, Value>,
    pub inferred: bool,
}

/// Parse a single-record export. The whole document is validated before
/// anything is returned, so a malformed file never yields a partial record.
pub fn parse_record(text: &str, policy: ImportPolicy) -> Result<ImportedRecord, ImportError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut obj) = value else {
        return Err(ImportError::NotAnObject);
    };

    let tag = obj.remove(RECORD_TYPE_TAG);
    let (kind, inferred) = match tag {
        Some(Value::String(tag)) => (tag.parse::<RecordKind>()?, false),
        Some(other) => return Err(UnknownKind(other.to_string()).into()),
        None => match policy {
            ImportPolicy::Strict => return Err(ImportError::Untagged),
            ImportPolicy::Infer => (infer_kind(&obj), true),
        },
    };

    let meta_name = obj
        .get("meta")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let name = meta_name
        .or_else(|| obj.get("name").and_then(Value::as_str).map(str::to_string))
        .filter(|n| !n.trim().is_empty())
        .ok_or(ImportError::MissingName)?;

    obj.remove("meta");

    Ok(ImportedRecord {
        kind,
        name,
        payload: obj,
        inferred,
    })
}

/// Classify an untagged object by the fields it carries. Shapes matching no
/// rule are treated as settings.
pub fn infer_kind(obj: &Map<String, Value>) -> RecordKind {
    let has = |key: &str| obj.contains_key(key);
    let has_any = |keys: &[&str]| keys.iter().any(|k| obj.contains_key(*k));

    if RecordBundle::looks_like_backup(obj) {
        RecordKind::Backup
    } else if has("combatants") && has("round") {
        RecordKind::Encounter
    } else if has("combatants") {
        RecordKind::Template
    } else if has("classes") && has("abilities") {
        RecordKind::Player
    } else if has_any(&["challenge_rating", "challengeRating", "cr"])
        && has_any(&["hit_points", "hitPoints", "hp", "armor_class", "armorClass", "ac"])
    {
        RecordKind::Monster
    } else {
        RecordKind::Settings
    }
}

/// Render a record as an export document carrying its kind tag.
pub fn tag_export(kind: RecordKind, record: &Record) -> Result<Value, RecordError> {
    let mut value = record.to_value()?;
    if let Value::Object(obj) = &mut value {
        obj.insert(
            RECORD_TYPE_TAG.to_string(),
            Value::String(kind.as_str().to_string()),
        );
    }
    Ok(value)
}
