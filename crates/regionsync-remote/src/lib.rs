//! regionsync-remote: persistence client for the region store.
//!
//! Defines the typed contract to the remote store, a decorator adding
//! bounded timeouts and exponential backoff, and an in-memory reference
//! store with exact conditional-write semantics.
//!
//! # Architecture
//!
//! ```text
//! RegionStore
//!   └── Arc<dyn RemoteStore>
//!       └── RetryingRemote (timeout per call, backoff on transient errors)
//!           └── transport (MemoryRemote in-process, or a network client)
//! ```
//!
//! # Conflicts
//!
//! Conditional writes that miss (stale version or vanished row) return
//! `WriteOutcome::NoMatchingRow` rather than an error. The retry layer
//! never retries them; the caller must re-read before writing again.

pub mod client;
pub mod error;
pub mod memory;
pub mod retry;

pub use client::{RemoteFuture, RemoteStore};
pub use error::{RemoteError, RemoteResult};
pub use memory::{MemoryRemote, RemoteCall};
pub use retry::{Backoff, RetryPolicy, RetryingRemote};
