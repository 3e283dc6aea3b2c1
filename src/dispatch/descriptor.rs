//! Job descriptors carried by the dispatch queue.

use std::time::Duration;

use uuid::Uuid;

/// A request to convert one document. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub document_id: i64,
    /// Source-specific reference handed to the converter.
    pub external_ref: String,
    /// Failed attempts so far, as known when the descriptor was made.
    pub retry_count: u32,
    /// How long the worker waits before attempting.
    pub delay: Duration,
    /// Short random id for correlating log lines.
    pub descriptor_id: String,
}

impl JobDescriptor {
    pub fn new(document_id: i64, external_ref: impl Into<String>, retry_count: u32) -> Self {
        let mut descriptor_id = Uuid::new_v4().simple().to_string();
        descriptor_id.truncate(8);
        Self {
            document_id,
            external_ref: external_ref.into(),
            retry_count,
            delay: Duration::ZERO,
            descriptor_id,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}
