//! Error types for the offline queue.

use thiserror::Error;

/// Result type alias for offline queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while opening or maintaining the queue.
///
/// Enqueueing never surfaces these; see [`crate::OfflineQueue::enqueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open queue database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
