//! regionsync-queue: durable offline mutation queue.
//!
//! Backed by [redb](https://docs.rs/redb). Mutations attempted while the
//! remote store is unreachable are appended here and replayed in FIFO
//! order once connectivity returns.
//!
//! # Architecture
//!
//! Entries are JSON-serialized into a `u64 → &[u8]` table keyed by a
//! monotonically increasing sequence number, so iteration order is
//! submission order. A second table maps local placeholder ids to the
//! server ids that replaced them, so queued updates that still name a
//! placeholder can be routed after the create lands.
//!
//! The `OfflineQueue` is `Clone` + `Send` + `Sync` (backed by `Arc`) and
//! can be shared across async tasks.

pub mod error;
pub mod queue;
pub mod tables;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use queue::OfflineQueue;
pub use types::*;
