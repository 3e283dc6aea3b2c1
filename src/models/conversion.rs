//! Conversion state models.
//!
//! A `ConversionRecord` is the persistent, per-document view of where text
//! extraction stands. It is the single source of truth for scheduling: the
//! in-memory dispatch queue only carries hints about work that may need doing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversion status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl ConversionStatus {
    pub const ALL: [ConversionStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Succeeded,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent conversion record, one per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRecord {
    /// Database row ID.
    pub id: i64,
    /// Document this record tracks (unique).
    pub document_id: i64,
    pub status: ConversionStatus,
    /// Extracted text. Only present once the record has succeeded.
    pub text: Option<String>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Token of the worker currently holding the claim.
    pub owner_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Message from the most recent failed attempt.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversionRecord {
    /// Whether failures have used up the retry budget.
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// Whether no further automatic transitions will happen.
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        match self.status {
            ConversionStatus::Succeeded => true,
            ConversionStatus::Failed => self.retries_exhausted(max_retries),
            ConversionStatus::Pending | ConversionStatus::Processing => false,
        }
    }

    /// Whether a processing claim is older than `stale_window` at `now`.
    pub fn is_stale_claim(&self, now: DateTime<Utc>, stale_window: chrono::Duration) -> bool {
        match (self.status, self.claimed_at) {
            (ConversionStatus::Processing, Some(claimed_at)) => claimed_at < now - stale_window,
            _ => false,
        }
    }
}
