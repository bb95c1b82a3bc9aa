// ABOUTME: Multi-record documents: collection exports and composite backups.
// ABOUTME: Serializes as `{ <plural>: [records], version, exportDate }` and parses the same shape back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::kind::RecordKind;
use crate::record::{Record, RecordError};

/// Errors that can occur while parsing a bundle document.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle must be a JSON object")]
    NotAnObject,

    #[error("bundle has no record collections")]
    Empty,

    #[error("bundle is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("bundle field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("bundle record in `{collection}` is malformed: {source}")]
    Record {
        collection: String,
        #[source]
        source: RecordError,
    },
}

/// A set of records grouped by kind, with the version of the writer and the
/// time the document was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBundle {
    pub collections: BTreeMap<RecordKind, Vec<Record>>,
    pub version: String,
    pub export_date: DateTime<Utc>,
}

impl RecordBundle {
    pub fn new(version: &str) -> Self {
        Self {
            collections: BTreeMap::new(),
            version: version.to_string(),
            export_date: Utc::now(),
        }
    }

    pub fn insert(&mut self, kind: RecordKind, records: Vec<Record>) {
        self.collections.insert(kind, records);
    }

    pub fn records(&self, kind: RecordKind) -> &[Record] {
        self.collections.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of records across every collection.
    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_value(&self) -> Result<Value, RecordError> {
        let mut obj = Map::new();
        for (kind, records) in &self.collections {
            let values = records
                .iter()
                .map(Record::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            obj.insert(kind.plural().to_string(), Value::Array(values));
        }
        obj.insert("version".to_string(), json!(self.version));
        obj.insert("exportDate".to_string(), json!(self.export_date.to_rfc3339()));
        Ok(Value::Object(obj))
    }

    pub fn from_value(value: Value) -> Result<Self, BundleError> {
        let Value::Object(mut obj) = value else {
            return Err(BundleError::NotAnObject);
        };

        let version = match obj.remove("version") {
            Some(Value::String(v)) => v,
            Some(_) => {
                return Err(BundleError::InvalidField {
                    field: "version".to_string(),
                    reason: "expected a string".to_string(),
                });
            }
            None => return Err(BundleError::MissingField("version")),
        };

        let export_date = match obj.remove("exportDate") {
            Some(Value::String(d)) => DateTime::parse_from_rfc3339(&d)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| BundleError::InvalidField {
                    field: "exportDate".to_string(),
                    reason: e.to_string(),
                })?,
            Some(_) => {
                return Err(BundleError::InvalidField {
                    field: "exportDate".to_string(),
                    reason: "expected an RFC 3339 string".to_string(),
                });
            }
            None => return Err(BundleError::MissingField("exportDate")),
        };

        let mut collections = BTreeMap::new();
        for (key, value) in obj {
            let Some(kind) = RecordKind::from_plural(&key) else {
                continue;
            };
            let Value::Array(items) = value else {
                return Err(BundleError::InvalidField {
                    field: key,
                    reason: "expected an array of records".to_string(),
                });
            };
            let records = items
                .into_iter()
                .map(Record::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| BundleError::Record {
                    collection: key.clone(),
                    source,
                })?;
            collections.insert(kind, records);
        }

        if collections.is_empty() {
            return Err(BundleError::Empty);
        }

        Ok(Self {
            collections,
            version,
            export_date,
        })
    }

    /// True when the object carries at least two collection arrays, the shape
    /// of a composite backup rather than a single record.
    pub fn looks_like_backup(obj: &Map<String, Value>) -> bool {
        obj.iter()
            .filter(|(k, v)| RecordKind::from_plural(k).is_some() && v.is_array())
            .count()
            >= 2
    }
}
