use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::RawRecord;

/// A decoded record and the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub topic: String,
    pub record: RawRecord,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload on {topic}: {reason}")]
    Malformed { topic: String, reason: String },
}

/// An unbounded source of kiosk records, such as a message-broker topic.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Wait at most `timeout` for the next record. `Ok(None)` means nothing arrived in time.
    /// Retrying transport failures, if at all, is up to the implementation.
    async fn poll(&self, timeout: Duration) -> Result<Option<SourceRecord>, SourceError>;
}
