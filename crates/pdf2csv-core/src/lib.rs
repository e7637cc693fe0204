// pdf2csv-core - Shared domain model
//
// Pure data crate consumed by every other subsystem: the lifecycle event
// union (bus and wire frames share one representation), file-metadata row
// types, and extracted entity records. No I/O lives here.

mod entity;
mod event;
mod file_meta;
mod snapshot;

pub use entity::{EntityRecord, ExtractedDocument, ExtractedEntity};
pub use event::{BatchCounts, QueueEvent};
pub use file_meta::{
    BatchAggregate, FileMetaSummary, FileMetadata, NewFile, ProcessingStatus, StatusParseError,
};
pub use snapshot::BatchSnapshot;
