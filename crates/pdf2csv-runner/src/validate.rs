// Entity validation and deduplication
//
// Collaborator output is untrusted: values get trimmed, confidences clamped
// into 0..=1, and exact (kind, value, page) repeats collapse to one record.

use std::collections::HashSet;

use pdf2csv_core::{EntityRecord, ExtractedDocument};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub accepted: Vec<EntityRecord>,
    pub rejected: usize,
}

pub fn validate(file_id: Uuid, doc: &ExtractedDocument) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen: HashSet<(String, String, u32)> = HashSet::new();

    for entity in &doc.entities {
        let kind = entity.kind.trim();
        let value = entity.value.trim();

        if kind.is_empty() || value.is_empty() {
            report.rejected += 1;
            continue;
        }

        if !seen.insert((kind.to_string(), value.to_string(), entity.page)) {
            report.rejected += 1;
            continue;
        }

        report.accepted.push(EntityRecord {
            file_id,
            kind: kind.to_string(),
            value: value.to_string(),
            confidence: entity.confidence.clamp(0.0, 1.0),
            page: entity.page,
        });
    }

    report
}
