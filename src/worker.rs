//! Conversion worker: pulls descriptors, claims, converts, finalizes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::converter::{ConversionError, Converter};
use crate::dispatch::{DispatchQueue, InFlight, JobDescriptor, QueueWorker};
use crate::models::{ConversionRecord, ConversionStatus};
use crate::repository::{ConversionRepository, DieselError};

/// How long a worker waits on an empty queue before re-checking shutdown.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a claim attempt did not give us the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Missing,
    AlreadySucceeded,
    OwnedByOther(Option<String>),
    NotRetryEligible,
    /// Someone else claimed and released it between our read and write.
    Contended,
}

impl RejectReason {
    fn from_record(record: Option<&ConversionRecord>) -> Self {
        match record {
            None => Self::Missing,
            Some(r) => match r.status {
                ConversionStatus::Succeeded => Self::AlreadySucceeded,
                ConversionStatus::Processing => Self::OwnedByOther(r.owner_token.clone()),
                ConversionStatus::Failed => Self::NotRetryEligible,
                ConversionStatus::Pending => Self::Contended,
            },
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("no conversion record"),
            Self::AlreadySucceeded => f.write_str("already succeeded"),
            Self::OwnedByOther(Some(owner)) => write!(f, "being processed by {owner}"),
            Self::OwnedByOther(None) => f.write_str("being processed by another worker"),
            Self::NotRetryEligible => f.write_str("retries exhausted"),
            Self::Contended => f.write_str("claimed concurrently"),
        }
    }
}

/// How one attempt on a descriptor ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Another worker owns it, or nothing is left to do.
    Rejected(RejectReason),
    Succeeded { chars: usize },
    /// Failed; a new descriptor with backoff is on the queue.
    RetryScheduled { retry_count: u32, delay: Duration },
    FailedTerminal { retry_count: u32 },
    /// A stale reclaim took the record while we were converting.
    OwnershipLost,
    /// The result could not be written; the claim will go stale.
    FinalizeFailed,
}

/// Runs conversion attempts for descriptors from a dispatch queue.
pub struct ConversionWorker {
    repo: ConversionRepository,
    converter: Arc<dyn Converter>,
    retry_base_delay: Duration,
    host: String,
}

impl ConversionWorker {
    pub fn new(
        repo: ConversionRepository,
        converter: Arc<dyn Converter>,
        retry_base_delay: Duration,
    ) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            repo,
            converter,
            retry_base_delay,
            host,
        }
    }

    /// Backoff before the attempt following failure number `retry_count`.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.retry_base_delay.saturating_mul(factor)
    }

    fn owner_token(&self, worker_name: &str) -> String {
        format!("{}@{}:{}", worker_name, self.host, Uuid::new_v4())
    }

    /// Run one attempt for a descriptor.
    ///
    /// Errors are database failures before anything was claimed; the
    /// descriptor can be retried as-is.
    pub async fn process(
        &self,
        worker_name: &str,
        job: &JobDescriptor,
        queue: &DispatchQueue,
    ) -> Result<AttemptOutcome, DieselError> {
        let document_id = job.document_id;
        let token = self.owner_token(worker_name);

        let claim = self.repo.try_claim(document_id, &token).await?;
        if !claim.claimed {
            let reason = RejectReason::from_record(claim.record.as_ref());
            info!(
                "Skipping document {} (job {}): {}",
                document_id, job.descriptor_id, reason
            );
            return Ok(AttemptOutcome::Rejected(reason));
        }

        // The store is authoritative for how many attempts have failed
        let retry_count = claim
            .record
            .as_ref()
            .map(|r| r.retry_count)
            .unwrap_or(job.retry_count);

        info!(
            "Converting document {} ({}), attempt {}",
            document_id,
            job.external_ref,
            retry_count + 1
        );

        let result = self.convert(&job.external_ref).await;

        let outcome = match result {
            Ok(text) => self.finish_success(document_id, &token, &text).await,
            Err(err) => {
                self.finish_failure(job, &token, retry_count, err, queue)
                    .await
            }
        };
        Ok(outcome)
    }

    async fn convert(&self, external_ref: &str) -> Result<String, ConversionError> {
        let converter = self.converter.clone();
        let external_ref = external_ref.to_string();

        let result = tokio::task::spawn_blocking(move || converter.convert(&external_ref))
            .await
            .unwrap_or_else(|e| {
                Err(ConversionError::Retryable(format!(
                    "Converter task failed: {e}"
                )))
            });

        match result {
            Ok(text) if text.trim().is_empty() => Err(ConversionError::Permanent(
                "Conversion produced no text".to_string(),
            )),
            other => other,
        }
    }

    async fn finish_success(&self, document_id: i64, token: &str, text: &str) -> AttemptOutcome {
        match self.repo.mark_succeeded(document_id, token, text).await {
            Ok(true) => {
                info!(
                    "Converted document {} ({} chars)",
                    document_id,
                    text.len()
                );
                AttemptOutcome::Succeeded { chars: text.len() }
            }
            Ok(false) => {
                warn!(
                    "Lost ownership of document {} before saving; discarding result",
                    document_id
                );
                AttemptOutcome::OwnershipLost
            }
            Err(e) => {
                error!("Failed to save text for document {}: {}", document_id, e);
                AttemptOutcome::FinalizeFailed
            }
        }
    }

    async fn finish_failure(
        &self,
        job: &JobDescriptor,
        token: &str,
        retry_count: u32,
        err: ConversionError,
        queue: &DispatchQueue,
    ) -> AttemptOutcome {
        let document_id = job.document_id;
        let new_retry_count = retry_count + 1;
        let max_retries = self.repo.policy().max_retries;
        let permanent = err.is_permanent() || new_retry_count >= max_retries;

        match self
            .repo
            .mark_failed(document_id, token, err.message(), permanent)
            .await
        {
            Ok(true) if permanent => {
                error!(
                    "Conversion of document {} failed permanently after {} attempts: {}",
                    document_id, new_retry_count, err
                );
                // Permanent errors are pushed up to the retry budget by the store
                let retry_count = if err.is_permanent() {
                    new_retry_count.max(max_retries)
                } else {
                    new_retry_count
                };
                AttemptOutcome::FailedTerminal { retry_count }
            }
            Ok(true) => {
                let delay = self.retry_delay(new_retry_count);
                queue.enqueue(
                    JobDescriptor::new(document_id, job.external_ref.clone(), new_retry_count)
                        .with_delay(delay),
                );
                warn!(
                    "Conversion of document {} failed ({}), retry {}/{} in {:?}",
                    document_id, err, new_retry_count, max_retries, delay
                );
                AttemptOutcome::RetryScheduled {
                    retry_count: new_retry_count,
                    delay,
                }
            }
            Ok(false) => {
                warn!(
                    "Lost ownership of document {} before recording failure: {}",
                    document_id, err
                );
                AttemptOutcome::OwnershipLost
            }
            Err(e) => {
                error!(
                    "Failed to record failure for document {}: {}",
                    document_id, e
                );
                AttemptOutcome::FinalizeFailed
            }
        }
    }

    async fn run_loop(&self, name: &str, queue: &Arc<DispatchQueue>) {
        let mut shutdown = queue.shutdown_signal();
        info!("Worker started");

        loop {
            if queue.shutdown_requested() {
                break;
            }
            let Some(job) = queue.dequeue(DEQUEUE_TIMEOUT).await else {
                continue;
            };
            let in_flight = InFlight::new(queue.clone(), job);

            // Dropping the guard puts the descriptor back
            if queue.shutdown_requested() {
                break;
            }

            let delay = in_flight.job().delay;
            if !delay.is_zero() {
                debug!(
                    "Delaying job {} by {:?}",
                    in_flight.job().descriptor_id,
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }

            match self.process(name, in_flight.job(), queue).await {
                Ok(outcome) => {
                    let job = in_flight.finish();
                    debug!("Job {} finished: {:?}", job.descriptor_id, outcome);
                }
                Err(e) => {
                    let mut job = in_flight.finish();
                    error!(
                        "Database error on job {} for document {}: {}; retrying in {:?}",
                        job.descriptor_id, job.document_id, e, self.retry_base_delay
                    );
                    job.delay = self.retry_base_delay;
                    queue.enqueue(job);
                }
            }
        }

        info!("Worker stopped");
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl QueueWorker for ConversionWorker {
    async fn run(self: Arc<Self>, name: String, queue: Arc<DispatchQueue>) {
        let span = info_span!("worker", worker.name = %name);
        self.run_loop(&name, &queue).instrument(span).await
    }
}
