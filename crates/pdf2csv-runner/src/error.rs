//! Error types for the runner crate

use thiserror::Error;

/// Failures talking to the OCR/extraction collaborator.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Transport-level failure or 5xx; worth retrying.
    #[error("extraction service unreachable: {0}")]
    Unavailable(String),

    /// The collaborator rejected the document (4xx); retrying won't help.
    #[error("extraction rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The collaborator answered with something we can't parse.
    #[error("invalid extraction response: {0}")]
    InvalidResponse(String),

    #[error("ocr client misconfigured: {0}")]
    Config(String),
}

impl OcrError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::Unavailable(_))
    }
}
