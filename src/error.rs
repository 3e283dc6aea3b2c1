//! Caller-facing error types for conversion coordination.

use thiserror::Error;

use crate::models::{ConversionStatus, DocumentSource};

/// Errors returned to feature code by the conversion service.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Document not found: {0}")]
    NotFound(i64),

    #[error("Document {document_id} comes from '{origin}', which cannot be converted")]
    UnsupportedSource {
        document_id: i64,
        origin: DocumentSource,
    },

    #[error("Conversion of document {document_id} failed permanently: {message}")]
    Exhausted { document_id: i64, message: String },

    #[error("Timed out waiting for document {document_id} (last status: {})", .last_status.map(|s| s.as_str()).unwrap_or("none"))]
    Timeout {
        document_id: i64,
        last_status: Option<ConversionStatus>,
    },

    #[error("Conversion of document {0} succeeded but produced no text")]
    MissingText(i64),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Dispatch queue errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker pool size must be at least 1")]
    NoWorkers,

    #[error("Dispatch queue is shutting down")]
    ShuttingDown,
}
