//! MemoryRemote: in-process reference implementation of [`RemoteStore`].
//!
//! Implements the conditional-write contract exactly: updates and deletes
//! land only when the stored version matches, soft-deleted rows are kept
//! but hidden from `list`, and a mismatch or a missing row both come back
//! as `NoMatchingRow`.
//!
//! Test controls let callers take the store offline, script failures,
//! add latency, drop acknowledgements, and simulate edits made by other
//! sessions. Every call is recorded in a call log.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use regionsync_core::{NewRegion, Region, RegionPatch, RegionWrite, RoleDefault, WriteOutcome};

use crate::client::{RemoteFuture, RemoteStore};
use crate::error::{RemoteError, RemoteResult};

/// One recorded call against a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List {
        layout_id: String,
    },
    Create {
        layout_id: String,
        region: NewRegion,
    },
    Update {
        layout_id: String,
        region_id: String,
        write: RegionWrite,
    },
    Delete {
        layout_id: String,
        region_id: String,
        expected_version: u64,
    },
    RoleDefaults {
        role: String,
    },
}

#[derive(Default)]
struct MemoryState {
    /// (layout_id, region_id) → region, soft-deleted rows included.
    regions: BTreeMap<(String, String), Region>,
    next_id: u64,
    offline: bool,
    failures: VecDeque<RemoteError>,
    dropped_acks: u32,
    latency: Option<Duration>,
    calls: Vec<RemoteCall>,
    role_defaults: HashMap<String, Vec<RoleDefault>>,
}

impl MemoryState {
    /// Fail the current call if the store is offline or a failure is scripted.
    fn check_available(&mut self) -> RemoteResult<()> {
        if self.offline {
            return Err(RemoteError::Offline);
        }
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Lose the response of a call that already took effect.
    fn check_ack(&mut self) -> RemoteResult<()> {
        if self.dropped_acks > 0 {
            self.dropped_acks -= 1;
            return Err(RemoteError::Transient("connection reset after write".into()));
        }
        Ok(())
    }

    fn active_mut(&mut self, layout_id: &str, region_id: &str) -> Option<&mut Region> {
        self.regions
            .get_mut(&(layout_id.to_string(), region_id.to_string()))
            .filter(|r| r.is_active())
    }
}

/// In-memory remote store.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    // ── Test controls ──────────────────────────────────────────────

    /// Toggle connectivity; while offline every call fails with `Offline`.
    pub fn set_online(&self, online: bool) {
        self.state().offline = !online;
    }

    /// Fail the next call with `err`. Calls are failed in FIFO order.
    pub fn fail_next(&self, err: RemoteError) {
        self.state().failures.push_back(err);
    }

    /// Apply the next write but report a transient failure to the caller.
    pub fn drop_next_ack(&self) {
        self.state().dropped_acks += 1;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    pub fn set_role_defaults(&self, role: &str, defaults: Vec<RoleDefault>) {
        self.state().role_defaults.insert(role.to_string(), defaults);
    }

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Only the update calls, oldest first.
    pub fn update_calls(&self) -> Vec<RegionWrite> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Update { write, .. } => Some(write.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Stored row, soft-deleted or not.
    pub fn region(&self, layout_id: &str, region_id: &str) -> Option<Region> {
        self.state()
            .regions
            .get(&(layout_id.to_string(), region_id.to_string()))
            .cloned()
    }

    /// Seed a row directly, bypassing the call log.
    pub fn insert_region(&self, region: Region) {
        let key = (region.layout_id.clone(), region.id.clone());
        self.state().regions.insert(key, region);
    }

    /// Apply `patch` as another session would, bumping the version.
    pub fn edit_elsewhere(
        &self,
        layout_id: &str,
        region_id: &str,
        patch: &RegionPatch,
    ) -> Option<Region> {
        let mut state = self.state();
        let region = state.active_mut(layout_id, region_id)?;
        *region = patch.apply_to(region);
        region.version += 1;
        region.updated_at = epoch_secs();
        Some(region.clone())
    }

    /// Soft-delete a row as another session would.
    pub fn delete_elsewhere(&self, layout_id: &str, region_id: &str) -> bool {
        let mut state = self.state();
        match state.active_mut(layout_id, region_id) {
            Some(region) => {
                region.deleted_at = Some(epoch_secs());
                region.version += 1;
                true
            }
            None => false,
        }
    }
}

impl MemoryRemote {
    async fn list_active(&self, layout_id: &str) -> RemoteResult<Vec<Region>> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(RemoteCall::List {
            layout_id: layout_id.to_string(),
        });
        state.check_available()?;
        Ok(state
            .regions
            .values()
            .filter(|r| r.layout_id == layout_id && r.is_active())
            .cloned()
            .collect())
    }

    async fn insert_new(&self, layout_id: &str, region: &NewRegion) -> RemoteResult<Region> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(RemoteCall::Create {
            layout_id: layout_id.to_string(),
            region: region.clone(),
        });
        state.check_available()?;

        state.next_id += 1;
        let now = epoch_secs();
        let created = Region {
            id: format!("srv-{}", state.next_id),
            layout_id: layout_id.to_string(),
            region_type: region.region_type.clone(),
            grid_row: region.grid_row,
            grid_col: region.grid_col,
            row_span: region.row_span,
            col_span: region.col_span,
            is_collapsed: false,
            is_locked: false,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state
            .regions
            .insert((layout_id.to_string(), created.id.clone()), created.clone());
        debug!(%layout_id, region_id = %created.id, "region created");
        state.check_ack()?;
        Ok(created)
    }

    async fn conditional_update(
        &self,
        layout_id: &str,
        region_id: &str,
        write: &RegionWrite,
    ) -> RemoteResult<WriteOutcome<Region>> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(RemoteCall::Update {
            layout_id: layout_id.to_string(),
            region_id: region_id.to_string(),
            write: write.clone(),
        });
        state.check_available()?;

        let outcome = match state.active_mut(layout_id, region_id) {
            Some(region) if region.version == write.expected_version => {
                *region = write.fields.apply_to(region);
                region.version = write.version;
                region.updated_at = epoch_secs();
                WriteOutcome::Applied(region.clone())
            }
            _ => WriteOutcome::NoMatchingRow,
        };
        if !outcome.is_conflict() {
            state.check_ack()?;
        }
        Ok(outcome)
    }

    async fn conditional_delete(
        &self,
        layout_id: &str,
        region_id: &str,
        expected_version: u64,
    ) -> RemoteResult<WriteOutcome<()>> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(RemoteCall::Delete {
            layout_id: layout_id.to_string(),
            region_id: region_id.to_string(),
            expected_version,
        });
        state.check_available()?;

        let outcome = match state.active_mut(layout_id, region_id) {
            Some(region) if region.version == expected_version => {
                let now = epoch_secs();
                region.deleted_at = Some(now);
                region.updated_at = now;
                region.version += 1;
                WriteOutcome::Applied(())
            }
            _ => WriteOutcome::NoMatchingRow,
        };
        if !outcome.is_conflict() {
            state.check_ack()?;
        }
        Ok(outcome)
    }

    async fn defaults_for(&self, role: &str) -> RemoteResult<Vec<RoleDefault>> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(RemoteCall::RoleDefaults {
            role: role.to_string(),
        });
        state.check_available()?;
        Ok(state.role_defaults.get(role).cloned().unwrap_or_default())
    }
}

impl RemoteStore for MemoryRemote {
    fn list<'a>(&'a self, layout_id: &'a str) -> RemoteFuture<'a, Vec<Region>> {
        Box::pin(self.list_active(layout_id))
    }

    fn create<'a>(
        &'a self,
        layout_id: &'a str,
        region: &'a NewRegion,
    ) -> RemoteFuture<'a, Region> {
        Box::pin(self.insert_new(layout_id, region))
    }

    fn update<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        write: &'a RegionWrite,
    ) -> RemoteFuture<'a, WriteOutcome<Region>> {
        Box::pin(self.conditional_update(layout_id, region_id, write))
    }

    fn delete<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        expected_version: u64,
    ) -> RemoteFuture<'a, WriteOutcome<()>> {
        Box::pin(self.conditional_delete(layout_id, region_id, expected_version))
    }

    fn role_defaults<'a>(&'a self, role: &'a str) -> RemoteFuture<'a, Vec<RoleDefault>> {
        Box::pin(self.defaults_for(role))
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
