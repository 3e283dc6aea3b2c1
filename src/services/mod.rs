//! Service layer for business logic.

pub mod conversion;

pub use conversion::{ConversionService, DocumentLookup};
