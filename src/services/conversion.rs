//! Conversion coordination service.
//!
//! The entry point feature code uses to get a document's text. It decides
//! whether a document needs (re)queueing and waits for a terminal state by
//! polling the conversion store, which stays the source of truth.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchQueue, JobDescriptor};
use crate::error::CoordinationError;
use crate::models::{ConversionRecord, ConversionStatus, Document};
use crate::repository::{ConversionRepository, DieselError};

/// First pause between status polls.
pub const POLL_INITIAL: Duration = Duration::from_millis(500);
/// Growth factor applied to the pause after each poll.
pub const POLL_FACTOR: f64 = 1.5;
/// Longest pause between status polls.
pub const POLL_MAX: Duration = Duration::from_secs(5);

/// Resolves document ids to documents.
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    async fn lookup(&self, document_id: i64) -> Result<Option<Document>, DieselError>;
}

/// Coordinates conversion requests with the queue and the store.
#[derive(Clone)]
pub struct ConversionService {
    documents: Arc<dyn DocumentLookup>,
    conversions: ConversionRepository,
    queue: Arc<DispatchQueue>,
    default_wait_timeout: Duration,
}

impl ConversionService {
    pub fn new(
        documents: Arc<dyn DocumentLookup>,
        conversions: ConversionRepository,
        queue: Arc<DispatchQueue>,
        default_wait_timeout: Duration,
    ) -> Self {
        Self {
            documents,
            conversions,
            queue,
            default_wait_timeout,
        }
    }

    async fn convertible_document(&self, document_id: i64) -> Result<Document, CoordinationError> {
        let document = self
            .documents
            .lookup(document_id)
            .await?
            .ok_or(CoordinationError::NotFound(document_id))?;

        if !document.source.is_convertible() {
            return Err(CoordinationError::UnsupportedSource {
                document_id,
                origin: document.source,
            });
        }
        Ok(document)
    }

    fn needs_dispatch(&self, record: &ConversionRecord) -> bool {
        let policy = self.conversions.policy();
        match record.status {
            ConversionStatus::Pending => true,
            ConversionStatus::Failed => !record.retries_exhausted(policy.max_retries),
            ConversionStatus::Processing => {
                record.is_stale_claim(Utc::now(), policy.stale_window_chrono())
            }
            ConversionStatus::Succeeded => false,
        }
    }

    /// Make sure a conversion is queued if one is needed.
    ///
    /// Returns `true` when a descriptor was enqueued, `false` when the
    /// document is already converted, terminally failed, or actively being
    /// worked on.
    pub async fn trigger_conversion(&self, document_id: i64) -> Result<bool, CoordinationError> {
        let document = self.convertible_document(document_id).await?;
        let (record, created) = self.conversions.get_or_create_pending(document_id).await?;

        if !created && !self.needs_dispatch(&record) {
            debug!(
                "Not queueing document {}: status {}",
                document_id, record.status
            );
            return Ok(false);
        }

        let job = JobDescriptor::new(document_id, document.external_ref, record.retry_count);
        info!(
            "Queued conversion of document {} (job {}, status {})",
            document_id, job.descriptor_id, record.status
        );
        self.queue.enqueue(job);
        Ok(true)
    }

    /// Poll until the document's conversion is terminal or `timeout` passes.
    ///
    /// Never mutates anything. On timeout the error carries the last status
    /// seen.
    pub async fn wait_for_completion(
        &self,
        document_id: i64,
        timeout: Duration,
    ) -> Result<ConversionStatus, CoordinationError> {
        // A timeout too large to represent means no deadline at all
        let deadline = Instant::now().checked_add(timeout);
        let mut pause = POLL_INITIAL;

        loop {
            let (complete, status) = self.conversions.is_complete(document_id).await?;
            if let (true, Some(status)) = (complete, status) {
                return Ok(status);
            }

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CoordinationError::Timeout {
                            document_id,
                            last_status: status,
                        });
                    }
                    pause.min(deadline - now)
                }
                None => pause,
            };

            debug!(
                "Document {} not done (status {:?}), polling again in {:?}",
                document_id, status, sleep_for
            );
            tokio::time::sleep(sleep_for).await;
            pause = pause.mul_f64(POLL_FACTOR).min(POLL_MAX);
        }
    }

    /// Return the document's text, converting it first if necessary.
    pub async fn get_or_wait_for_text(&self, document_id: i64) -> Result<String, CoordinationError> {
        self.get_or_wait_for_text_within(document_id, self.default_wait_timeout)
            .await
    }

    /// Like `get_or_wait_for_text` with an explicit wait budget.
    pub async fn get_or_wait_for_text_within(
        &self,
        document_id: i64,
        timeout: Duration,
    ) -> Result<String, CoordinationError> {
        self.convertible_document(document_id).await?;

        if let Some(record) = self.conversions.get(document_id).await? {
            if let Some(result) = self.terminal_result(record) {
                return result;
            }
        }

        self.trigger_conversion(document_id).await?;
        self.wait_for_completion(document_id, timeout).await?;

        let record = self
            .conversions
            .get(document_id)
            .await?
            .ok_or(CoordinationError::NotFound(document_id))?;
        match self.terminal_result(record) {
            Some(result) => result,
            // Raced with a stale reclaim between the poll and this read
            None => Err(CoordinationError::Timeout {
                document_id,
                last_status: Some(ConversionStatus::Processing),
            }),
        }
    }

    fn terminal_result(&self, record: ConversionRecord) -> Option<Result<String, CoordinationError>> {
        let document_id = record.document_id;
        match record.status {
            ConversionStatus::Succeeded => Some(match record.text {
                Some(text) if !text.trim().is_empty() => Ok(text),
                _ => Err(CoordinationError::MissingText(document_id)),
            }),
            ConversionStatus::Failed
                if record.retries_exhausted(self.conversions.policy().max_retries) =>
            {
                Some(Err(CoordinationError::Exhausted {
                    document_id,
                    message: record
                        .error_message
                        .unwrap_or_else(|| "no error recorded".to_string()),
                }))
            }
            _ => None,
        }
    }

    /// Re-queue conversions left unfinished, e.g. by a previous process.
    ///
    /// Returns how many descriptors were enqueued.
    pub async fn recover_pending(&self, limit: i64) -> Result<usize, CoordinationError> {
        let records = self.conversions.list_recoverable(limit).await?;
        let mut queued = 0;

        for record in records {
            match self.trigger_conversion(record.document_id).await {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(CoordinationError::Database(e)) => return Err(e.into()),
                Err(e) => warn!("Skipping recovery of document {}: {}", record.document_id, e),
            }
        }

        if queued > 0 {
            info!("Recovered {} unfinished conversions", queued);
        }
        Ok(queued)
    }
}
