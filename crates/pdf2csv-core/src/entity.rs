// Extracted entity types
//
// What the OCR collaborator returns for one document, and the validated
// record shape the store persists.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entity as returned by the OCR/extraction service, pre-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: String,
    pub value: String,
    /// Collaborator-reported confidence; validated into 0.0..=1.0.
    pub confidence: f64,
    #[serde(default)]
    pub page: u32,
}

/// OCR output for a single file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
}

/// A validated entity row, keyed to the file it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub file_id: Uuid,
    pub kind: String,
    pub value: String,
    pub confidence: f64,
    pub page: u32,
}
