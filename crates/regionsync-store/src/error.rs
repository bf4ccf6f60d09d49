//! Error types for the region store.

use thiserror::Error;

use regionsync_queue::QueueError;
use regionsync_remote::RemoteError;

/// Failures surfaced to callers of [`RegionStore`](crate::RegionStore).
///
/// Geometry never fails (it is clamped) and offline writes never fail
/// (they are queued), so neither appears here except for the opt-in
/// overlap rejection.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Contract violation: an operation was called without a layout id.
    #[error("layout id is required")]
    MissingLayout,

    #[error("layout {0} has not been loaded")]
    UnknownLayout(String),

    #[error("region {region_id} not found in layout {layout_id}")]
    RegionNotFound {
        layout_id: String,
        region_id: String,
    },

    /// The region changed under us. The local copy has been reloaded.
    #[error("region {region_id} changed elsewhere (now version {server_version}); reloaded")]
    Conflict {
        layout_id: String,
        region_id: String,
        server_version: u64,
    },

    /// Only raised with `overlap = "reject"`.
    #[error("region {region_id} would overlap region {other}")]
    Overlap { region_id: String, other: String },

    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("offline queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("region store is closed")]
    Closed,
}

impl StoreError {
    /// Whether the UI can recover by reloading or retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::Overlap { .. } | StoreError::Remote(_)
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
