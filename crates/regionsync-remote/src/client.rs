//! The persistence interface consumed by the region store.
//!
//! Implementations wrap whatever transport reaches the remote store. Methods
//! return boxed futures so the trait stays object safe and a store can hold
//! an `Arc<dyn RemoteStore>` injected at construction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regionsync_core::{NewRegion, Region, RegionWrite, RoleDefault, WriteOutcome};

use crate::error::RemoteResult;

/// Boxed future returned by every [`RemoteStore`] method.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = RemoteResult<T>> + Send + 'a>>;

/// Typed request/response contract to the remote region store.
pub trait RemoteStore: Send + Sync {
    /// Active (non-deleted) regions of a layout.
    fn list<'a>(&'a self, layout_id: &'a str) -> RemoteFuture<'a, Vec<Region>>;

    /// Insert a region. The store assigns the id and starts at version 1.
    fn create<'a>(
        &'a self,
        layout_id: &'a str,
        region: &'a NewRegion,
    ) -> RemoteFuture<'a, Region>;

    /// Conditional write: lands only if the stored version equals
    /// `write.expected_version`. A missing row also yields `NoMatchingRow`.
    fn update<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        write: &'a RegionWrite,
    ) -> RemoteFuture<'a, WriteOutcome<Region>>;

    /// Soft delete, executed as a conditional update that sets `deleted_at`.
    fn delete<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        expected_version: u64,
    ) -> RemoteFuture<'a, WriteOutcome<()>>;

    /// Seed layout for bootstrapping a role's first dashboard.
    fn role_defaults<'a>(&'a self, role: &'a str) -> RemoteFuture<'a, Vec<RoleDefault>>;
}

/// Shared handles forward to the store they point at.
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn list<'a>(&'a self, layout_id: &'a str) -> RemoteFuture<'a, Vec<Region>> {
        (**self).list(layout_id)
    }

    fn create<'a>(
        &'a self,
        layout_id: &'a str,
        region: &'a NewRegion,
    ) -> RemoteFuture<'a, Region> {
        (**self).create(layout_id, region)
    }

    fn update<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        write: &'a RegionWrite,
    ) -> RemoteFuture<'a, WriteOutcome<Region>> {
        (**self).update(layout_id, region_id, write)
    }

    fn delete<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        expected_version: u64,
    ) -> RemoteFuture<'a, WriteOutcome<()>> {
        (**self).delete(layout_id, region_id, expected_version)
    }

    fn role_defaults<'a>(&'a self, role: &'a str) -> RemoteFuture<'a, Vec<RoleDefault>> {
        (**self).role_defaults(role)
    }
}
