//! Queue entry types.
//!
//! A `QueuedMutation` records one create, update or delete attempted while
//! the remote store was unreachable. `data` carries the operation payload
//! as JSON so the queue stays agnostic of the resource shape.

use serde::{Deserialize, Serialize};

/// Resource name used for dashboard regions.
pub const REGION_RESOURCE: &str = "region";

/// Kind of mutation recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// A mutation waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    #[serde(rename = "type")]
    pub kind: MutationKind,
    pub resource: String,
    pub layout_id: String,
    /// Target id. For creates this is the local placeholder id.
    #[serde(default)]
    pub resource_id: Option<String>,
    pub data: serde_json::Value,
    /// Unix timestamp (milliseconds) when the mutation was queued.
    pub timestamp: u64,
}

impl QueuedMutation {
    pub fn new(
        kind: MutationKind,
        layout_id: &str,
        resource_id: Option<&str>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            resource: REGION_RESOURCE.to_string(),
            layout_id: layout_id.to_string(),
            resource_id: resource_id.map(str::to_string),
            data,
            timestamp: epoch_millis(),
        }
    }

    /// Ordering stream this mutation belongs to.
    ///
    /// Entries in the same stream must replay in order; a failure in one
    /// stream does not hold back the others.
    pub fn stream_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.resource,
            self.layout_id,
            self.resource_id.as_deref().unwrap_or("")
        )
    }
}

/// A queued mutation together with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub seq: u64,
    #[serde(flatten)]
    pub mutation: QueuedMutation,
}

pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
