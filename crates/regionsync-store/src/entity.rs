//! Local entity model.
//!
//! A cached region is either confirmed by the remote store or carries an
//! unconfirmed local change. The pending form keeps the last confirmed
//! copy as its baseline, so rolling back is a substitution rather than
//! field-by-field patching.

use regionsync_core::{Region, RegionPatch};

/// A region with local changes the remote store has not confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRegion {
    /// What the UI shows: the baseline with `patch` applied.
    pub current: Region,
    /// Last confirmed copy. `None` while the create itself is unconfirmed.
    pub baseline: Option<Region>,
    /// Version `patch` was made against; the next conditional write expects
    /// it. A listing that carries another session's write does not move it.
    pub base_version: Option<u64>,
    /// Local changes not yet acknowledged.
    pub patch: RegionPatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalRegion {
    Confirmed(Region),
    Pending(PendingRegion),
}

impl LocalRegion {
    /// An optimistic insert awaiting its create acknowledgement.
    pub fn placeholder(region: Region) -> Self {
        LocalRegion::Pending(PendingRegion {
            current: region,
            baseline: None,
            base_version: None,
            patch: RegionPatch::default(),
        })
    }

    /// The displayed state.
    pub fn current(&self) -> &Region {
        match self {
            LocalRegion::Confirmed(region) => region,
            LocalRegion::Pending(pending) => &pending.current,
        }
    }

    pub fn id(&self) -> &str {
        &self.current().id
    }

    /// True while some local change is unconfirmed.
    pub fn is_optimistic(&self) -> bool {
        matches!(self, LocalRegion::Pending(_))
    }

    /// True for an insert the remote store has never acknowledged.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, LocalRegion::Pending(PendingRegion { baseline: None, .. }))
    }

    pub fn is_active(&self) -> bool {
        self.current().is_active()
    }

    /// The local changes merged into the displayed state, if any.
    pub fn pending_update(&self) -> Option<&RegionPatch> {
        match self {
            LocalRegion::Pending(pending) if !pending.patch.is_empty() => Some(&pending.patch),
            _ => None,
        }
    }

    /// Last confirmed copy.
    pub fn baseline(&self) -> Option<&Region> {
        match self {
            LocalRegion::Confirmed(region) => Some(region),
            LocalRegion::Pending(pending) => pending.baseline.as_ref(),
        }
    }

    /// Version the next conditional write must expect.
    pub fn expected_version(&self) -> Option<u64> {
        match self {
            LocalRegion::Confirmed(region) => Some(region.version),
            LocalRegion::Pending(pending) => pending.base_version,
        }
    }

    /// Merge `patch` into the displayed state.
    pub fn apply(&mut self, patch: RegionPatch) {
        match self {
            LocalRegion::Confirmed(region) => {
                let baseline = region.clone();
                *self = LocalRegion::Pending(PendingRegion {
                    current: patch.apply_to(&baseline),
                    base_version: Some(baseline.version),
                    baseline: Some(baseline),
                    patch,
                });
            }
            LocalRegion::Pending(pending) => {
                pending.current = patch.apply_to(&pending.current);
                pending.patch.merge(patch);
            }
        }
    }

    /// Hide the region locally until its delete is confirmed.
    pub fn mark_deleted(&mut self, at: u64) {
        match self {
            LocalRegion::Confirmed(region) => {
                let baseline = region.clone();
                let mut current = baseline.clone();
                current.deleted_at = Some(at);
                *self = LocalRegion::Pending(PendingRegion {
                    current,
                    base_version: Some(baseline.version),
                    baseline: Some(baseline),
                    patch: RegionPatch::default(),
                });
            }
            LocalRegion::Pending(pending) => pending.current.deleted_at = Some(at),
        }
    }

    /// Rebase onto the copy returned by our own acknowledged write.
    ///
    /// Local changes the server already reflects are dropped; the rest stay
    /// pending on top of the new baseline and expect its version.
    pub fn rebase(self, server: Region) -> LocalRegion {
        match self {
            LocalRegion::Confirmed(_) => LocalRegion::Confirmed(server),
            LocalRegion::Pending(pending) => {
                let base_version = Some(server.version);
                pending.settle(server, base_version)
            }
        }
    }

    /// Take a copy from a fresh listing.
    ///
    /// The listing may carry another session's write. Unconfirmed changes
    /// keep expecting the version they were made against, so their write
    /// surfaces the conflict instead of overwriting that session's edit.
    pub fn refresh(self, server: Region) -> LocalRegion {
        match self {
            LocalRegion::Confirmed(_) => LocalRegion::Confirmed(server),
            LocalRegion::Pending(pending) => {
                let base_version = pending.base_version;
                pending.settle(server, base_version)
            }
        }
    }

    /// Discard local changes. `None` means the region never existed remotely.
    pub fn rollback(self) -> Option<LocalRegion> {
        match self {
            LocalRegion::Confirmed(region) => Some(LocalRegion::Confirmed(region)),
            LocalRegion::Pending(pending) => pending.baseline.map(LocalRegion::Confirmed),
        }
    }
}

impl PendingRegion {
    fn settle(self, server: Region, base_version: Option<u64>) -> LocalRegion {
        let deleting = self.current.deleted_at;
        if deleting.is_none() && self.patch.is_applied_to(&server) {
            return LocalRegion::Confirmed(server);
        }
        let mut current = self.patch.apply_to(&server);
        current.deleted_at = deleting;
        LocalRegion::Pending(PendingRegion {
            current,
            baseline: Some(server),
            base_version,
            patch: self.patch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(version: u64) -> Region {
        Region {
            id: "srv-1".to_string(),
            layout_id: "layout-1".to_string(),
            region_type: "kpi".to_string(),
            grid_row: 0,
            grid_col: 0,
            row_span: 2,
            col_span: 3,
            is_collapsed: false,
            is_locked: false,
            version,
            created_at: 1,
            updated_at: 1,
            deleted_at: None,
        }
    }

    #[test]
    fn apply_keeps_baseline() {
        let mut entity = LocalRegion::Confirmed(region(1));
        entity.apply(RegionPatch::position(2, 4));
        entity.apply(RegionPatch::collapsed(true));

        assert!(entity.is_optimistic());
        assert_eq!(entity.current().grid_col, 4);
        assert!(entity.current().is_collapsed);
        assert_eq!(entity.expected_version(), Some(1));
        let patch = entity.pending_update().unwrap();
        assert_eq!(patch.grid_row, Some(2));
        assert_eq!(patch.is_collapsed, Some(true));
    }

    #[test]
    fn rollback_substitutes_baseline() {
        let mut entity = LocalRegion::Confirmed(region(3));
        entity.apply(RegionPatch::size(5, 5));
        assert_eq!(entity.rollback(), Some(LocalRegion::Confirmed(region(3))));

        let placeholder = LocalRegion::placeholder(region(1));
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.rollback(), None);
    }

    #[test]
    fn rebase_confirms_when_server_caught_up() {
        let mut entity = LocalRegion::Confirmed(region(1));
        entity.apply(RegionPatch::locked(true));

        let mut server = region(2);
        server.is_locked = true;
        assert_eq!(entity.rebase(server.clone()), LocalRegion::Confirmed(server));
    }

    #[test]
    fn rebase_keeps_newer_local_changes() {
        let mut entity = LocalRegion::Confirmed(region(1));
        entity.apply(RegionPatch::position(1, 1));
        entity.apply(RegionPatch::position(6, 6));

        let mut server = region(2);
        server.grid_row = 1;
        server.grid_col = 1;
        let rebased = entity.rebase(server);

        assert!(rebased.is_optimistic());
        assert_eq!(rebased.expected_version(), Some(2));
        assert_eq!(rebased.current().grid_col, 6);
    }

    #[test]
    fn refresh_keeps_the_version_changes_were_made_against() {
        let mut entity = LocalRegion::Confirmed(region(1));
        entity.apply(RegionPatch::position(3, 3));

        let mut foreign = region(2);
        foreign.is_collapsed = true;
        let refreshed = entity.refresh(foreign.clone());

        assert_eq!(refreshed.expected_version(), Some(1));
        assert!(refreshed.current().is_collapsed);
        assert_eq!(refreshed.current().grid_col, 3);
        // Rolling back shows the fresh copy, not the stale one.
        assert_eq!(refreshed.rollback(), Some(LocalRegion::Confirmed(foreign)));
    }

    #[test]
    fn refresh_of_a_pending_delete_keeps_its_version() {
        let mut entity = LocalRegion::Confirmed(region(1));
        entity.mark_deleted(9);

        let refreshed = entity.refresh(region(2));
        assert!(!refreshed.is_active());
        assert_eq!(refreshed.expected_version(), Some(1));
    }

    #[test]
    fn mark_deleted_hides_but_keeps_baseline() {
        let mut entity = LocalRegion::Confirmed(region(4));
        entity.mark_deleted(99);

        assert!(!entity.is_active());
        assert_eq!(entity.expected_version(), Some(4));
        assert!(entity.rollback().unwrap().is_active());
    }
}
