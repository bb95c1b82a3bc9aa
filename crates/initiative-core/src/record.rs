// ABOUTME: Defines the persisted record envelope: caller payload plus the meta block.
// ABOUTME: Stamping attaches name, timestamp, version, and the auto-save flag before a record is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::kind::RecordKind;

/// Errors that can occur while building a record envelope.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("record name must not be empty")]
    EmptyName,

    #[error("malformed record envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Metadata attached by the save manager. Callers never set it themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub name: String,
    pub date: DateTime<Utc>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_auto_save: Option<bool>,
}

/// A stored record: the caller's payload fields with `meta` alongside them.
/// Serializes as `{ ...payload, "meta": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    pub meta: RecordMeta,
}

impl Record {
    /// Build a record from a caller payload, stamping it with the current time.
    /// Any `meta` key the caller supplied is replaced.
    pub fn stamp(
        name: &str,
        payload: Value,
        version: &str,
        is_auto_save: bool,
    ) -> Result<Self, RecordError> {
        Self::stamp_at(name, payload, version, is_auto_save, Utc::now())
    }

    pub fn stamp_at(
        name: &str,
        payload: Value,
        version: &str,
        is_auto_save: bool,
        date: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        if name.trim().is_empty() {
            return Err(RecordError::EmptyName);
        }
        let mut payload = match payload {
            Value::Object(map) => map,
            other => return Err(RecordError::NotAnObject(json_type_name(&other))),
        };
        payload.remove("meta");

        Ok(Self {
            payload,
            meta: RecordMeta {
                name: name.to_string(),
                date,
                version: version.to_string(),
                is_auto_save: is_auto_save.then_some(true),
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn is_auto_save(&self) -> bool {
        self.meta.is_auto_save.unwrap_or(false)
    }

    /// The payload as a standalone JSON value, without the meta block.
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }

    pub fn to_value(&self) -> Result<Value, RecordError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn summary(&self, kind: RecordKind) -> RecordSummary {
        RecordSummary {
            kind,
            name: self.meta.name.clone(),
            date: self.meta.date,
            version: self.meta.version.clone(),
            is_auto_save: self.is_auto_save(),
        }
    }
}

/// Lightweight listing entry for a record, without its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub kind: RecordKind,
    pub name: String,
    pub date: DateTime<Utc>,
    pub version: String,
    pub is_auto_save: bool,
}

/// Sort records newest first; ties break on name so the order is stable.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.meta
            .date
            .cmp(&a.meta.date)
            .then_with(|| b.meta.name.cmp(&a.meta.name))
    });
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
