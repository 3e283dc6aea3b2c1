//! Conversion record repository.
//!
//! Persistent per-document conversion state with an atomic claim protocol.
//! Every mutation is a single conditional statement: when the condition does
//! not hold nothing is written, and the caller learns so from the affected
//! row count. Ownership of a `processing` row is proven by token equality.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{ConversionRecordRow, NewConversionRecord};
use super::pool::{DbPool, DieselError};
use super::util::{corrupt_value, format_timestamp};
use crate::models::{ConversionRecord, ConversionStatus};
use crate::schema::conversion_records;
use crate::with_conn;
use tracing::warn;

/// Retry and stale-claim limits applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// Failures allowed before a record becomes terminal.
    pub max_retries: u32,
    /// Age after which a `processing` claim may be taken over.
    pub stale_window: Duration,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stale_window: Duration::from_secs(600),
        }
    }
}

impl ClaimPolicy {
    /// Claims made before this instant are stale at `now`.
    pub fn stale_threshold(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.stale_window_chrono()
    }

    pub fn stale_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_window)
            .unwrap_or_else(|_| chrono::Duration::days(36_500))
    }

    fn max_retries_i32(&self) -> i32 {
        i32::try_from(self.max_retries).unwrap_or(i32::MAX)
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    /// Whether the caller now owns the record.
    pub claimed: bool,
    /// The record as read after the attempt. `None` if no record exists, or
    /// if a successful claim could not be read back.
    pub record: Option<ConversionRecord>,
}

/// Conversion record repository.
#[derive(Clone)]
pub struct ConversionRepository {
    pool: DbPool,
    policy: ClaimPolicy,
}

impl ConversionRepository {
    pub fn new(pool: DbPool, policy: ClaimPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> ClaimPolicy {
        self.policy
    }

    /// Get the conversion record for a document.
    pub async fn get(&self, document_id: i64) -> Result<Option<ConversionRecord>, DieselError> {
        let row: Option<ConversionRecordRow> = with_conn!(self.pool, conn, {
            conversion_records::table
                .filter(conversion_records::document_id.eq(document_id))
                .select(ConversionRecordRow::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;

        row.map(ConversionRecord::try_from).transpose()
    }

    /// Get the record for a document, creating a pending one if absent.
    ///
    /// Safe under concurrent callers: exactly one of them observes
    /// `was_created == true`.
    pub async fn get_or_create_pending(
        &self,
        document_id: i64,
    ) -> Result<(ConversionRecord, bool), DieselError> {
        let now = format_timestamp(Utc::now());
        let new_record = NewConversionRecord {
            document_id,
            status: ConversionStatus::Pending.as_str(),
            retry_count: 0,
            created_at: &now,
        };

        let inserted = with_conn!(self.pool, conn, {
            diesel::insert_into(conversion_records::table)
                .values(&new_record)
                .on_conflict(conversion_records::document_id)
                .do_nothing()
                .execute(&mut conn)
                .await
        })?;

        let record = self.get(document_id).await?.ok_or(DieselError::NotFound)?;
        Ok((record, inserted == 1))
    }

    /// Try to take ownership of a document's record.
    ///
    /// Succeeds when the record is pending, failed with retries left, or
    /// processing under a claim older than the stale window.
    pub async fn try_claim(
        &self,
        document_id: i64,
        owner_token: &str,
    ) -> Result<ClaimOutcome, DieselError> {
        let now_dt = Utc::now();
        let now = format_timestamp(now_dt);
        let threshold = format_timestamp(self.policy.stale_threshold(now_dt));
        let max_retries = self.policy.max_retries_i32();

        let claimable = conversion_records::status
            .eq(ConversionStatus::Pending.as_str())
            .or(conversion_records::status
                .eq(ConversionStatus::Failed.as_str())
                .and(conversion_records::retry_count.lt(max_retries)))
            .or(conversion_records::status
                .eq(ConversionStatus::Processing.as_str())
                .and(conversion_records::claimed_at.assume_not_null().lt(threshold)));

        let updated = with_conn!(self.pool, conn, {
            diesel::update(
                conversion_records::table
                    .filter(conversion_records::document_id.eq(document_id))
                    .filter(claimable),
            )
            .set((
                conversion_records::status.eq(ConversionStatus::Processing.as_str()),
                conversion_records::owner_token.eq(owner_token),
                conversion_records::claimed_at.eq(&now),
                conversion_records::started_at.eq(&now),
                conversion_records::finished_at.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await
        })?;

        if updated == 0 {
            return Ok(ClaimOutcome {
                claimed: false,
                record: self.get(document_id).await?,
            });
        }

        // The claim is ours now; failing the re-read must not hide that
        let record = match self.get(document_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Claimed document {} but could not re-read its record: {}",
                    document_id, e
                );
                None
            }
        };
        Ok(ClaimOutcome {
            claimed: true,
            record,
        })
    }

    /// Record a successful conversion. Returns `false` if ownership was lost.
    pub async fn mark_succeeded(
        &self,
        document_id: i64,
        owner_token: &str,
        text: &str,
    ) -> Result<bool, DieselError> {
        let now = format_timestamp(Utc::now());

        let updated = with_conn!(self.pool, conn, {
            diesel::update(
                conversion_records::table
                    .filter(conversion_records::document_id.eq(document_id))
                    .filter(conversion_records::owner_token.eq(owner_token))
                    .filter(conversion_records::status.eq(ConversionStatus::Processing.as_str())),
            )
            .set((
                conversion_records::status.eq(ConversionStatus::Succeeded.as_str()),
                conversion_records::text.eq(text),
                conversion_records::owner_token.eq(None::<String>),
                conversion_records::error_message.eq(None::<String>),
                conversion_records::finished_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })?;

        Ok(updated == 1)
    }

    /// Record a failed attempt. Returns `false` if ownership was lost.
    ///
    /// A retryable failure puts the record back to pending with one more
    /// retry used. A permanent failure marks it failed and raises the retry
    /// count to at least `max_retries`, so it is never claimed again.
    pub async fn mark_failed(
        &self,
        document_id: i64,
        owner_token: &str,
        message: &str,
        permanent: bool,
    ) -> Result<bool, DieselError> {
        use diesel::sql_types::{BigInt, Integer, Nullable, Text};

        let (status, retry_floor, finished_at) = if permanent {
            (
                ConversionStatus::Failed,
                self.policy.max_retries_i32(),
                Some(format_timestamp(Utc::now())),
            )
        } else {
            (ConversionStatus::Pending, 0, None)
        };

        // Parameters appear in numeric order so SQLite's named binding lines
        // up with PostgreSQL's positional binding.
        let updated = with_conn!(self.pool, conn, {
            diesel::sql_query(
                r#"UPDATE conversion_records
                   SET status = $1,
                       retry_count = CASE WHEN retry_count + 1 >= $2
                                          THEN retry_count + 1 ELSE $2 END,
                       owner_token = NULL,
                       claimed_at = NULL,
                       error_message = $3,
                       finished_at = $4
                   WHERE document_id = $5 AND owner_token = $6 AND status = 'processing'"#,
            )
            .bind::<Text, _>(status.as_str())
            .bind::<Integer, _>(retry_floor)
            .bind::<Text, _>(message)
            .bind::<Nullable<Text>, _>(finished_at)
            .bind::<BigInt, _>(document_id)
            .bind::<Text, _>(owner_token)
            .execute(&mut conn)
            .await
        })?;

        Ok(updated == 1)
    }

    /// Whether the document's conversion reached a terminal state, along
    /// with the current status (`None` if no record exists).
    pub async fn is_complete(
        &self,
        document_id: i64,
    ) -> Result<(bool, Option<ConversionStatus>), DieselError> {
        Ok(match self.get(document_id).await? {
            Some(record) => (record.is_terminal(self.policy.max_retries), Some(record.status)),
            None => (false, None),
        })
    }

    /// Records that still need work: pending, failed with retries left, or
    /// processing under a stale claim. Oldest first.
    pub async fn list_recoverable(&self, limit: i64) -> Result<Vec<ConversionRecord>, DieselError> {
        let threshold = format_timestamp(self.policy.stale_threshold(Utc::now()));
        let max_retries = self.policy.max_retries_i32();

        let recoverable = conversion_records::status
            .eq(ConversionStatus::Pending.as_str())
            .or(conversion_records::status
                .eq(ConversionStatus::Failed.as_str())
                .and(conversion_records::retry_count.lt(max_retries)))
            .or(conversion_records::status
                .eq(ConversionStatus::Processing.as_str())
                .and(conversion_records::claimed_at.assume_not_null().lt(threshold)));

        let rows: Vec<ConversionRecordRow> = with_conn!(self.pool, conn, {
            conversion_records::table
                .filter(recoverable)
                .order(conversion_records::id.asc())
                .limit(limit)
                .select(ConversionRecordRow::as_select())
                .load(&mut conn)
                .await
        })?;

        rows.into_iter().map(ConversionRecord::try_from).collect()
    }

    /// Count records by status.
    pub async fn count_by_status(&self) -> Result<HashMap<ConversionStatus, u64>, DieselError> {
        #[derive(diesel::QueryableByName)]
        struct StatusCount {
            #[diesel(sql_type = diesel::sql_types::Text)]
            status: String,
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            count: i64,
        }

        let rows: Vec<StatusCount> = with_conn!(self.pool, conn, {
            diesel::sql_query(
                "SELECT status, COUNT(*) AS count FROM conversion_records GROUP BY status",
            )
            .load(&mut conn)
            .await
        })?;

        let mut counts = HashMap::new();
        for StatusCount { status, count } in rows {
            let status =
                ConversionStatus::from_str(&status).ok_or_else(|| corrupt_value("status", &status))?;
            counts.insert(status, count as u64);
        }
        Ok(counts)
    }
}
