//! regionsync-core: shared types, grid geometry, and configuration for
//! the dashboard region-layout sync engine.

pub mod config;
pub mod geometry;
pub mod types;

pub use config::SyncConfig;
pub use geometry::{GridPlacement, GridRect, OverlapPolicy};
pub use types::*;
