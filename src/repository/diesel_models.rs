//! Diesel ORM models for database tables.
//!
//! Rows keep the storage representation (text timestamps and statuses);
//! conversion into domain models happens through `TryFrom` so a bad value
//! surfaces as a deserialization error instead of a silent default.

use diesel::prelude::*;

use super::util::corrupt_value;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{ConversionRecord, ConversionStatus, Document, DocumentSource};
use crate::schema;

/// Conversion record row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::conversion_records)]
pub struct ConversionRecordRow {
    pub id: i64,
    pub document_id: i64,
    pub status: String,
    pub text: Option<String>,
    pub retry_count: i32,
    pub owner_token: Option<String>,
    pub claimed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// New conversion record for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::conversion_records)]
pub struct NewConversionRecord<'a> {
    pub document_id: i64,
    pub status: &'a str,
    pub retry_count: i32,
    pub created_at: &'a str,
}

impl TryFrom<ConversionRecordRow> for ConversionRecord {
    type Error = diesel::result::Error;

    fn try_from(row: ConversionRecordRow) -> Result<Self, Self::Error> {
        let status = ConversionStatus::from_str(&row.status)
            .ok_or_else(|| corrupt_value("status", &row.status))?;
        let retry_count = u32::try_from(row.retry_count)
            .map_err(|_| corrupt_value("retry_count", &row.retry_count.to_string()))?;

        Ok(ConversionRecord {
            id: row.id,
            document_id: row.document_id,
            status,
            text: row.text,
            retry_count,
            owner_token: row.owner_token,
            claimed_at: parse_datetime_opt("claimed_at", row.claimed_at)?,
            error_message: row.error_message,
            created_at: parse_datetime("created_at", &row.created_at)?,
            started_at: parse_datetime_opt("started_at", row.started_at)?,
            finished_at: parse_datetime_opt("finished_at", row.finished_at)?,
        })
    }
}

/// Document record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
pub struct DocumentRecord {
    pub id: i64,
    pub source: String,
    pub external_ref: String,
    pub title: Option<String>,
    pub created_at: String,
}

/// New document for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::documents)]
pub struct NewDocument<'a> {
    pub source: &'a str,
    pub external_ref: &'a str,
    pub title: Option<&'a str>,
    pub created_at: &'a str,
}

impl TryFrom<DocumentRecord> for Document {
    type Error = diesel::result::Error;

    fn try_from(record: DocumentRecord) -> Result<Self, Self::Error> {
        let source = DocumentSource::from_str(&record.source)
            .ok_or_else(|| corrupt_value("source", &record.source))?;
        Ok(Document {
            id: record.id,
            source,
            external_ref: record.external_ref,
            title: record.title,
            created_at: parse_datetime("created_at", &record.created_at)?,
        })
    }
}
