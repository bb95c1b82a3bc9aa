// ABOUTME: Core library for initiative, containing the persisted record model.
// ABOUTME: Defines record kinds, the metadata envelope, bundles, and import parsing shared by all components.

pub mod bundle;
pub mod import;
pub mod kind;
pub mod record;

pub use bundle::{BundleError, RecordBundle};
pub use import::{ImportError, ImportPolicy, ImportedRecord, RECORD_TYPE_TAG, infer_kind, parse_record, tag_export};
pub use kind::{RecordKind, UnknownKind};
pub use record::{Record, RecordError, RecordMeta, RecordSummary, sort_newest_first};
