//! Repository layer for database persistence.
//!
//! All database access uses Diesel with diesel-async. Supports both SQLite
//! and PostgreSQL backends.

pub mod context;
pub mod conversion;
pub mod diesel_models;
pub mod document;
pub mod pool;
pub mod util;

pub use context::DbContext;
pub use conversion::{ClaimOutcome, ClaimPolicy, ConversionRepository};
pub use document::DocumentRepository;
pub use pool::{DbPool, DieselError};

use chrono::{DateTime, Utc};

/// Parse a datetime string stored in `column`.
pub fn parse_datetime(column: &str, s: &str) -> Result<DateTime<Utc>, DieselError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| util::corrupt_value(column, s))
}

/// Parse an optional datetime string stored in `column`.
pub fn parse_datetime_opt(
    column: &str,
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, DieselError> {
    s.map(|s| parse_datetime(column, &s)).transpose()
}
