//! regionsync-store: the dashboard region cache.
//!
//! A [`RegionStore`] holds the regions of every open layout, applies
//! mutations optimistically and persists them through a
//! [`RemoteStore`](regionsync_remote::RemoteStore), using conditional writes
//! keyed on each region's version.
//!
//! # Architecture
//!
//! ```text
//! UI ── LayoutHandle ── RegionStore ──┬── DebounceScheduler (drag/resize)
//!                                     ├── RemoteStore (conditional writes)
//!                                     └── OfflineQueue (while offline)
//! ```
//!
//! # Conflicts
//!
//! A write that misses its expected version triggers a re-read. A region
//! that vanished is dropped silently; one that changed elsewhere is
//! reloaded and reported as [`StoreError::Conflict`]. A write whose
//! acknowledgement was lost is recognised on the re-read and accepted.

pub mod debounce;
pub mod entity;
pub mod error;
pub mod facade;
pub mod layout;
pub mod replay;
pub mod store;

pub use debounce::{Coalesce, DebounceScheduler, RegionKey};
pub use entity::{LocalRegion, PendingRegion};
pub use error::{StoreError, StoreResult};
pub use facade::{LayoutHandle, RegionView};
pub use layout::LayoutError;
pub use replay::ReplayReport;
pub use store::RegionStore;
