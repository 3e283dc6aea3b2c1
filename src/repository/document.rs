//! Document registry repository.
//!
//! A minimal registry of documents keyed by `(source, external_ref)`. The
//! conversion service only reads it through the `DocumentLookup` trait.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{DocumentRecord, NewDocument};
use super::pool::{DbPool, DieselError};
use super::util::format_timestamp;
use crate::models::{Document, DocumentSource};
use crate::schema::documents;
use crate::services::DocumentLookup;
use crate::with_conn;

/// Document repository.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: DbPool,
}

impl DocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a document by ID.
    pub async fn get(&self, id: i64) -> Result<Option<Document>, DieselError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn, {
            documents::table
                .find(id)
                .select(DocumentRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;

        record.map(Document::try_from).transpose()
    }

    /// Register a document, returning the existing one if the same
    /// `(source, external_ref)` is already known.
    pub async fn add(
        &self,
        source: DocumentSource,
        external_ref: &str,
        title: Option<&str>,
    ) -> Result<Document, DieselError> {
        let now = format_timestamp(Utc::now());
        let new_document = NewDocument {
            source: source.as_str(),
            external_ref,
            title,
            created_at: &now,
        };

        let record: DocumentRecord = with_conn!(self.pool, conn, {
            diesel::insert_into(documents::table)
                .values(&new_document)
                .on_conflict((documents::source, documents::external_ref))
                .do_nothing()
                .execute(&mut conn)
                .await?;

            documents::table
                .filter(documents::source.eq(source.as_str()))
                .filter(documents::external_ref.eq(external_ref))
                .select(DocumentRecord::as_select())
                .first(&mut conn)
                .await
        })?;

        Document::try_from(record)
    }

    /// List documents, newest first.
    pub async fn list(&self, limit: i64) -> Result<Vec<Document>, DieselError> {
        let records: Vec<DocumentRecord> = with_conn!(self.pool, conn, {
            documents::table
                .order(documents::id.desc())
                .limit(limit)
                .select(DocumentRecord::as_select())
                .load(&mut conn)
                .await
        })?;

        records.into_iter().map(Document::try_from).collect()
    }
}

#[async_trait]
impl DocumentLookup for DocumentRepository {
    async fn lookup(&self, document_id: i64) -> Result<Option<Document>, DieselError> {
        self.get(document_id).await
    }
}
