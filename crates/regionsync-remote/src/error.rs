//! Remote persistence error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures reported by a remote store or the retry layer.
///
/// Version conflicts are not errors; they come back as
/// [`regionsync_core::WriteOutcome::NoMatchingRow`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection refused, reset, or a 5xx-style response.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// No connectivity at all; the caller should queue the mutation.
    #[error("remote store unreachable")]
    Offline,

    /// The store refused the request; retrying the same payload won't help.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether the retry layer should try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Timeout(_))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, RemoteError::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Transient("reset".into()).is_retryable());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!RemoteError::Offline.is_retryable());
        assert!(!RemoteError::Rejected("bad".into()).is_retryable());
        assert!(!RemoteError::Decode("eof".into()).is_retryable());
        assert!(RemoteError::Offline.is_offline());
    }
}
