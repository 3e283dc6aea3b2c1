//! Document-to-text converters.
//!
//! A converter is synchronous and may block for a long time; callers run it
//! on the blocking thread pool. Errors are classified so the worker can tell
//! a flaky network apart from a document that will never convert.

mod arxiv;

pub use arxiv::{ArxivPdfConverter, DEFAULT_ARXIV_PDF_BASE};

use thiserror::Error;

/// Errors that can occur while converting a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    /// Worth trying again later (network trouble, missing tool, 5xx).
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help (document gone, not a PDF, no text).
    #[error("{0}")]
    Permanent(String),
}

impl ConversionError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

/// Converts a document, identified by its source reference, to text.
///
/// Implementations must be idempotent: a stale claim can be taken over while
/// the original attempt is still running, so two calls for the same
/// reference may overlap.
pub trait Converter: Send + Sync {
    fn convert(&self, external_ref: &str) -> Result<String, ConversionError>;
}
