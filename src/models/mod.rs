//! Data models for papertext.

mod conversion;
mod document;

pub use conversion::{ConversionRecord, ConversionStatus};
pub use document::{Document, DocumentSource};
