//! RegionStore: the versioned region cache and mutation orchestrator.
//!
//! Every mutation lands in the cache first and is persisted afterwards:
//! through the debounce scheduler for drags and resizes, immediately for
//! toggles. Persisting runs under a per-region write lock, so at most one
//! write per region is in flight and changes made meanwhile form the next
//! write.
//!
//! While offline, or when the remote store reports itself unreachable,
//! mutations go to the offline queue and replay in order once connectivity
//! returns (see `replay.rs`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock, watch};
use tracing::{debug, error, info, warn};

use regionsync_core::geometry::{self, GridPlacement, OverlapPolicy};
use regionsync_core::{
    LayoutId, NewRegion, Region, RegionPatch, RegionWrite, SyncConfig, WriteOutcome,
};
use regionsync_queue::OfflineQueue;
use regionsync_remote::{RemoteError, RemoteStore, RetryPolicy, RetryingRemote};

use crate::debounce::{DebounceScheduler, RegionKey};
use crate::entity::LocalRegion;
use crate::error::{StoreError, StoreResult};
use crate::layout::{LayoutError, LayoutState};

pub(crate) struct StoreInner {
    pub(crate) config: SyncConfig,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) queue: OfflineQueue,
    pub(crate) layouts: RwLock<HashMap<LayoutId, LayoutState>>,
    pub(crate) debounce: DebounceScheduler<RegionPatch>,
    write_locks: Mutex<HashMap<RegionKey, Arc<AsyncMutex<()>>>>,
    /// Serialises replay passes.
    pub(crate) replay_lock: AsyncMutex<()>,
    online: AtomicBool,
    closed: AtomicBool,
    placeholder_seq: AtomicU64,
    revision: watch::Sender<u64>,
}

/// How a conditional-write miss was resolved after re-reading.
pub(crate) enum Resolution {
    /// The region no longer exists remotely.
    Gone,
    /// Our write had landed; only its acknowledgement was lost.
    AlreadyApplied(Region),
    /// Someone else changed the region.
    Diverged(Region),
}

/// Outcome of settling a conflict that did not surface as an error.
pub(crate) enum Settled {
    Landed(u64),
    Gone,
}

/// Session-scoped region cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RegionStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl RegionStore {
    /// Build a store over an already-configured remote client.
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteStore>, queue: OfflineQueue) -> Self {
        let debounce = DebounceScheduler::new(config.debounce_window());
        let (revision, _) = watch::channel(0);
        info!(
            debounce_ms = config.debounce.window_ms,
            overlap = ?config.grid.overlap,
            queued = queue.len(),
            "region store started"
        );
        Self {
            inner: Arc::new(StoreInner {
                config,
                remote,
                queue,
                layouts: RwLock::new(HashMap::new()),
                debounce,
                write_locks: Mutex::new(HashMap::new()),
                replay_lock: AsyncMutex::new(()),
                online: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                placeholder_seq: AtomicU64::new(0),
                revision,
            }),
        }
    }

    /// Build a store over a raw transport, adding timeouts and retry/backoff
    /// from `config.remote`.
    pub fn with_transport<R>(config: SyncConfig, transport: R, queue: OfflineQueue) -> Self
    where
        R: RemoteStore + 'static,
    {
        let policy = RetryPolicy::from_config(&config.remote);
        let remote: Arc<dyn RemoteStore> = Arc::new(RetryingRemote::new(transport, policy));
        Self::new(config, remote, queue)
    }

    /// Like [`with_transport`](Self::with_transport), opening the offline
    /// queue at `config.queue.path` (in memory when unset).
    pub fn open<R>(config: SyncConfig, transport: R) -> StoreResult<Self>
    where
        R: RemoteStore + 'static,
    {
        let queue = match &config.queue.path {
            Some(path) => OfflineQueue::open(path)?,
            None => OfflineQueue::open_in_memory()?,
        };
        Ok(Self::with_transport(config, transport, queue))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    /// Revision counter bumped on every cache change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Active regions of a layout as displayed, in display order.
    pub async fn regions(&self, layout_id: &str) -> Vec<Region> {
        let layouts = self.inner.layouts.read().await;
        layouts
            .get(layout_id)
            .map(LayoutState::active)
            .unwrap_or_default()
    }

    /// Every cached entity of a layout, bookkeeping included.
    pub async fn entities(&self, layout_id: &str) -> Vec<LocalRegion> {
        let layouts = self.inner.layouts.read().await;
        layouts
            .get(layout_id)
            .map(|layout| layout.entities().cloned().collect())
            .unwrap_or_default()
    }

    /// A cached entity, following a placeholder id to its server id.
    pub async fn region(&self, layout_id: &str, region_id: &str) -> Option<LocalRegion> {
        let layouts = self.inner.layouts.read().await;
        let region_id = self.inner.queue.resolve_id(region_id);
        layouts.get(layout_id)?.get(&region_id).cloned()
    }

    pub async fn is_loading(&self, layout_id: &str) -> bool {
        let layouts = self.inner.layouts.read().await;
        layouts.get(layout_id).is_some_and(|layout| layout.loading)
    }

    /// Last failure recorded for a layout.
    pub async fn error(&self, layout_id: &str) -> Option<LayoutError> {
        let layouts = self.inner.layouts.read().await;
        layouts.get(layout_id)?.error.clone()
    }

    /// Last failure of every layout that has one.
    pub async fn errors(&self) -> HashMap<LayoutId, LayoutError> {
        let layouts = self.inner.layouts.read().await;
        layouts
            .iter()
            .filter_map(|(id, layout)| Some((id.clone(), layout.error.clone()?)))
            .collect()
    }

    pub async fn clear_error(&self, layout_id: &str) {
        let mut layouts = self.inner.layouts.write().await;
        if let Some(layout) = layouts.get_mut(layout_id) {
            layout.error = None;
        }
        drop(layouts);
        self.bump();
    }

    /// Debounced writes waiting for their window to pass.
    pub fn pending_writes(&self, layout_id: &str) -> usize {
        self.inner.debounce.pending_for_layout(layout_id)
    }

    // ── Loading ────────────────────────────────────────────────────

    /// Fetch the active regions of a layout and replace the cache.
    ///
    /// On failure the previous cache stays readable and the error is
    /// recorded for the layout.
    pub async fn load_regions(&self, layout_id: &str) -> StoreResult<Vec<Region>> {
        self.ensure_open()?;
        require_layout(layout_id)?;

        self.inner
            .layouts
            .write()
            .await
            .entry(layout_id.to_string())
            .or_default()
            .loading = true;
        self.bump();

        let result = self.inner.remote.list(layout_id).await;

        let mut layouts = self.inner.layouts.write().await;
        let layout = layouts.entry(layout_id.to_string()).or_default();
        layout.loading = false;
        let outcome = match result {
            Ok(regions) => {
                debug!(layout_id, count = regions.len(), "regions loaded");
                layout.merge_server(regions);
                layout.loaded = true;
                layout.error = None;
                Ok(layout.active())
            }
            Err(e) => {
                error!(
                    layout_id,
                    op = "load",
                    error = %e,
                    "loading regions failed; keeping cached copy"
                );
                layout.error = Some(LayoutError::new("load", None, &e));
                Err(e)
            }
        };
        drop(layouts);
        self.bump();

        match outcome {
            Ok(regions) => Ok(regions),
            Err(e) => {
                if e.is_offline() {
                    self.go_offline();
                }
                Err(e.into())
            }
        }
    }

    /// Load a layout; on the first load of an empty layout, seed it with
    /// the defaults for `role`.
    pub async fn load_or_seed(&self, layout_id: &str, role: &str) -> StoreResult<Vec<Region>> {
        let regions = self.load_regions(layout_id).await?;

        let first_time = {
            let mut layouts = self.inner.layouts.write().await;
            let layout = layouts.entry(layout_id.to_string()).or_default();
            let first_time = !layout.seeded;
            layout.seeded = true;
            first_time
        };
        if !first_time || !regions.is_empty() {
            return Ok(regions);
        }

        let defaults = match self.inner.remote.role_defaults(role).await {
            Ok(defaults) => defaults,
            Err(e) => {
                error!(layout_id, role, op = "seed", error = %e, "fetching role defaults failed");
                self.record_error(layout_id, LayoutError::new("seed", None, &e)).await;
                return Err(e.into());
            }
        };
        info!(layout_id, role, count = defaults.len(), "seeding empty layout");

        for seed in defaults {
            let placement = GridPlacement::at(seed.grid_row, seed.grid_col);
            match self.add_region(layout_id, &seed.region_type, placement).await {
                Ok(_) => {}
                Err(StoreError::Overlap { region_id, other }) => {
                    warn!(
                        layout_id,
                        region_type = %seed.region_type,
                        %region_id,
                        %other,
                        "seed region overlaps; skipped"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.regions(layout_id).await)
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Insert a region optimistically and create it remotely.
    ///
    /// The placement is clamped to the grid. The returned region carries a
    /// placeholder id until the create is confirmed (or, offline, replayed).
    pub async fn add_region(
        &self,
        layout_id: &str,
        region_type: &str,
        placement: GridPlacement,
    ) -> StoreResult<Region> {
        self.ensure_open()?;
        require_layout(layout_id)?;

        let grid = &self.inner.config.grid;
        let rect =
            geometry::clamp_placement(placement, grid.default_row_span, grid.default_col_span);
        let placeholder = self.next_placeholder_id();
        let now = epoch_secs();
        let optimistic = Region {
            id: placeholder.clone(),
            layout_id: layout_id.to_string(),
            region_type: region_type.to_string(),
            grid_row: rect.row,
            grid_col: rect.col,
            row_span: rect.row_span,
            col_span: rect.col_span,
            is_collapsed: false,
            is_locked: false,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        {
            let mut layouts = self.inner.layouts.write().await;
            let layout = layouts.entry(layout_id.to_string()).or_default();
            if grid.overlap == OverlapPolicy::Reject {
                if let Some(other) = layout.find_overlap(&rect, &placeholder) {
                    return Err(StoreError::Overlap {
                        region_id: placeholder,
                        other,
                    });
                }
            }
            layout.insert(LocalRegion::placeholder(optimistic.clone()));
        }
        self.bump();

        let new_region = NewRegion {
            region_type: region_type.to_string(),
            grid_row: rect.row,
            grid_col: rect.col,
            row_span: rect.row_span,
            col_span: rect.col_span,
        };

        let _guard = self
            .write_lock(&RegionKey::new(layout_id, &placeholder))
            .lock_owned()
            .await;

        if !self.is_online() {
            self.enqueue_create(layout_id, &placeholder, &new_region);
            return Ok(optimistic);
        }

        match self.inner.remote.create(layout_id, &new_region).await {
            Ok(server) => {
                info!(
                    layout_id,
                    region_id = %server.id,
                    %placeholder,
                    region_type,
                    "region created"
                );
                Ok(self.confirm_create(layout_id, &placeholder, server).await)
            }
            Err(RemoteError::Offline) => {
                self.go_offline();
                self.enqueue_create(layout_id, &placeholder, &new_region);
                Ok(optimistic)
            }
            Err(e) => {
                error!(
                    layout_id,
                    region_id = %placeholder,
                    op = "create",
                    error = %e,
                    "region create failed; removing optimistic insert"
                );
                self.forget(layout_id, &placeholder).await;
                self.record_error(layout_id, LayoutError::new("create", Some(&placeholder), &e))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Merge `patch` into a region and persist it.
    ///
    /// Geometry in the patch is clamped. With `debounced`, the write waits
    /// for the debounce window; otherwise it is sent now, together with any
    /// debounced changes still waiting for this region.
    pub async fn update_region(
        &self,
        layout_id: &str,
        region_id: &str,
        patch: RegionPatch,
        debounced: bool,
    ) -> StoreResult<Region> {
        self.ensure_open()?;
        require_layout(layout_id)?;

        let (region_id, displayed, patch) = {
            let mut layouts = self.inner.layouts.write().await;
            let layout = layouts
                .get_mut(layout_id)
                .ok_or_else(|| StoreError::UnknownLayout(layout_id.to_string()))?;
            let region_id = self.inner.queue.resolve_id(region_id);
            let current = layout
                .get(&region_id)
                .filter(|entity| entity.is_active())
                .map(|entity| entity.current().clone())
                .ok_or_else(|| not_found(layout_id, &region_id))?;

            let patch = clamp_patch(&current, patch);
            if patch.is_empty() {
                return Ok(current);
            }
            if self.inner.config.grid.overlap == OverlapPolicy::Reject && touches_geometry(&patch) {
                let rect = patch.apply_to(&current).rect();
                if let Some(other) = layout.find_overlap(&rect, &region_id) {
                    return Err(StoreError::Overlap { region_id, other });
                }
            }

            let Some(entity) = layout.get_mut(&region_id) else {
                return Err(not_found(layout_id, &region_id));
            };
            entity.apply(patch.clone());
            (region_id, entity.current().clone(), patch)
        };
        self.bump();

        let key = RegionKey::new(layout_id, &region_id);
        if debounced {
            self.schedule_write(key, patch);
            return Ok(displayed);
        }

        let patch = match self.inner.debounce.take(&key) {
            Some(mut waiting) => {
                waiting.merge(patch);
                waiting
            }
            None => patch,
        };
        self.write_region(&key, patch).await?;

        Ok(self
            .region(layout_id, &region_id)
            .await
            .map(|entity| entity.current().clone())
            .unwrap_or(displayed))
    }

    /// Move a region; debounced. Locked regions do not move.
    pub async fn update_region_position(
        &self,
        layout_id: &str,
        region_id: &str,
        row: i32,
        col: i32,
    ) -> StoreResult<Region> {
        let current = self.active_region(layout_id, region_id).await?;
        if current.is_locked {
            debug!(layout_id, region_id, "region is locked; move ignored");
            return Ok(current);
        }
        let (row, col) = geometry::clamp_position(row, col, current.col_span);
        self.update_region(layout_id, region_id, RegionPatch::position(row, col), true)
            .await
    }

    /// Resize a region; debounced. Locked regions do not resize.
    pub async fn update_region_size(
        &self,
        layout_id: &str,
        region_id: &str,
        row_span: i32,
        col_span: i32,
    ) -> StoreResult<Region> {
        let current = self.active_region(layout_id, region_id).await?;
        if current.is_locked {
            debug!(layout_id, region_id, "region is locked; resize ignored");
            return Ok(current);
        }
        let (row_span, col_span) = geometry::clamp_size(row_span, col_span, current.grid_col);
        self.update_region(layout_id, region_id, RegionPatch::size(row_span, col_span), true)
            .await
    }

    /// Flip `is_collapsed` and persist immediately.
    pub async fn toggle_collapse(&self, layout_id: &str, region_id: &str) -> StoreResult<Region> {
        let current = self.active_region(layout_id, region_id).await?;
        let patch = RegionPatch::collapsed(!current.is_collapsed);
        self.update_region(layout_id, region_id, patch, false).await
    }

    /// Flip `is_locked` and persist immediately.
    pub async fn toggle_lock(&self, layout_id: &str, region_id: &str) -> StoreResult<Region> {
        let current = self.active_region(layout_id, region_id).await?;
        let patch = RegionPatch::locked(!current.is_locked);
        self.update_region(layout_id, region_id, patch, false).await
    }

    /// Soft-delete a region.
    ///
    /// Removing a region that is already gone, locally or remotely, is a
    /// no-op success. On other failures the region is restored.
    pub async fn remove_region(&self, layout_id: &str, region_id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        require_layout(layout_id)?;

        let waiting = RegionKey::new(layout_id, &self.inner.queue.resolve_id(region_id));
        self.inner.debounce.take(&waiting);
        let (region_id, _guard) = self.lock_region(layout_id, region_id).await;
        // Edits that raced in while waiting for the lock.
        self.inner.debounce.take(&RegionKey::new(layout_id, &region_id));

        let expected = {
            let mut layouts = self.inner.layouts.write().await;
            let Some(entity) = layouts
                .get_mut(layout_id)
                .and_then(|layout| layout.get_mut(&region_id))
            else {
                debug!(
                    layout_id,
                    region_id = %region_id,
                    "remove of unknown region; nothing to do"
                );
                return Ok(());
            };
            if !entity.is_active() {
                debug!(layout_id, region_id = %region_id, "region already being removed");
                return Ok(());
            }
            let expected = entity.expected_version();
            entity.mark_deleted(epoch_secs());
            expected
        };
        self.bump();

        let Some(expected) = expected else {
            match self.inner.queue.remove_resource(&region_id) {
                Ok(dropped) => {
                    debug!(
                        layout_id,
                        region_id = %region_id,
                        dropped,
                        "unconfirmed region removed; queued changes dropped"
                    )
                }
                Err(e) => {
                    error!(
                        layout_id,
                        region_id = %region_id,
                        error = %e,
                        "failed to drop queued changes of removed region"
                    )
                }
            }
            self.forget(layout_id, &region_id).await;
            return Ok(());
        };

        if !self.is_online() || self.inner.queue.contains_resource(&region_id) {
            self.enqueue_delete(layout_id, &region_id, Some(expected));
            return Ok(());
        }

        match self.inner.remote.delete(layout_id, &region_id, expected).await {
            Ok(WriteOutcome::Applied(())) => {
                info!(layout_id, region_id = %region_id, "region removed");
                self.forget(layout_id, &region_id).await;
                Ok(())
            }
            Ok(WriteOutcome::NoMatchingRow) => {
                let resolution = self.resolve_conflict(layout_id, &region_id, None).await;
                self.settle_conflict(layout_id, &region_id, "delete", resolution)
                    .await
                    .map(|_| ())
            }
            Err(RemoteError::Offline) => {
                self.go_offline();
                self.enqueue_delete(layout_id, &region_id, Some(expected));
                Ok(())
            }
            Err(e) => {
                error!(
                    layout_id,
                    region_id = %region_id,
                    op = "delete",
                    error = %e,
                    "region removal failed; restoring"
                );
                self.rollback(layout_id, &region_id).await;
                self.record_error(layout_id, LayoutError::new("delete", Some(&region_id), &e))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Reorder regions locally; nothing is persisted.
    pub async fn reorder_regions<S: AsRef<str>>(
        &self,
        layout_id: &str,
        ordered_ids: &[S],
    ) -> StoreResult<()> {
        self.ensure_open()?;
        require_layout(layout_id)?;

        let ids: Vec<String> = ordered_ids
            .iter()
            .map(|id| self.inner.queue.resolve_id(id.as_ref()))
            .collect();
        {
            let mut layouts = self.inner.layouts.write().await;
            let layout = layouts
                .get_mut(layout_id)
                .ok_or_else(|| StoreError::UnknownLayout(layout_id.to_string()))?;
            layout.reorder(&ids);
        }
        debug!(layout_id, count = ids.len(), "regions reordered");
        self.bump();
        Ok(())
    }

    /// Persist every debounced write of a layout now.
    ///
    /// Resolves once those writes, and any write already in flight for the
    /// layout, have finished. Every write is attempted; the first failure
    /// is returned.
    pub async fn flush_updates(&self, layout_id: &str) -> StoreResult<()> {
        require_layout(layout_id)?;

        let waiting = self.inner.debounce.take_layout(layout_id);
        debug!(layout_id, count = waiting.len(), "flushing debounced writes");

        let mut first_error = None;
        for (key, patch) in waiting {
            if let Err(e) = self.write_region(&key, patch).await {
                first_error.get_or_insert(e);
            }
        }

        for lock in self.layout_locks(layout_id) {
            drop(lock.lock().await);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush every layout and stop accepting mutations.
    pub async fn close(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_error = None;
        for layout_id in self.inner.debounce.layouts() {
            if let Err(e) = self.flush_updates(&layout_id).await {
                first_error.get_or_insert(e);
            }
        }
        let cancelled = self.inner.debounce.cancel_all();
        info!(cancelled, queued = self.inner.queue.len(), "region store closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ── Connectivity ───────────────────────────────────────────────

    /// Report connectivity. Coming online replays the offline queue.
    pub async fn set_online(&self, online: bool) -> StoreResult<Option<crate::ReplayReport>> {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online != online {
            info!(online, queued = self.inner.queue.len(), "connectivity changed");
            self.bump();
        }
        if online && !self.inner.queue.is_empty() {
            return self.replay_offline_queue().await.map(Some);
        }
        Ok(None)
    }

    pub(crate) fn go_offline(&self) {
        if self.inner.online.swap(false, Ordering::SeqCst) {
            warn!(
                queued = self.inner.queue.len(),
                "remote store unreachable; changes will be queued"
            );
            self.bump();
        }
    }

    // ── Write path ─────────────────────────────────────────────────

    fn schedule_write(&self, key: RegionKey, patch: RegionPatch) {
        let store = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        self.inner.debounce.schedule(key, patch, move |patch| async move {
            let Some(inner) = store.upgrade() else {
                return;
            };
            // Failures are logged and recorded on the layout by the write path.
            let _ = RegionStore { inner }.write_region(&task_key, patch).await;
        });
    }

    /// Persist `patch` for one region under its write lock.
    pub(crate) async fn write_region(
        &self,
        key: &RegionKey,
        patch: RegionPatch,
    ) -> StoreResult<()> {
        let layout_id = key.layout_id.as_str();
        let (region_id, _guard) = self.lock_region(layout_id, &key.region_id).await;

        let expected = {
            let layouts = self.inner.layouts.read().await;
            match layouts.get(layout_id).and_then(|layout| layout.get(&region_id)) {
                Some(entity) if entity.is_active() => entity.expected_version(),
                _ => {
                    debug!(layout_id, region_id = %region_id, "region gone before write; dropping");
                    return Ok(());
                }
            }
        };

        let expected = match expected {
            Some(version)
                if self.is_online() && !self.inner.queue.contains_resource(&region_id) =>
            {
                version
            }
            expected => {
                self.enqueue_update(layout_id, &region_id, &patch, expected);
                return Ok(());
            }
        };

        let write = RegionWrite::new(expected, patch);
        match self.inner.remote.update(layout_id, &region_id, &write).await {
            Ok(WriteOutcome::Applied(server)) => {
                self.accept(layout_id, &region_id, Some(expected), server).await;
                Ok(())
            }
            Ok(WriteOutcome::NoMatchingRow) => {
                let resolution = self.resolve_conflict(layout_id, &region_id, Some(&write)).await;
                self.settle_conflict(layout_id, &region_id, "update", resolution)
                    .await
                    .map(|_| ())
            }
            Err(RemoteError::Offline) => {
                self.go_offline();
                self.enqueue_update(layout_id, &region_id, &write.fields, Some(expected));
                Ok(())
            }
            Err(e) => {
                error!(
                    layout_id,
                    region_id = %region_id,
                    op = "update",
                    error = %e,
                    "region update failed; rolling back"
                );
                self.rollback(layout_id, &region_id).await;
                self.record_error(layout_id, LayoutError::new("update", Some(&region_id), &e))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Re-read after a conditional-write miss.
    pub(crate) async fn resolve_conflict(
        &self,
        layout_id: &str,
        region_id: &str,
        write: Option<&RegionWrite>,
    ) -> Result<Resolution, RemoteError> {
        let fresh = self.inner.remote.list(layout_id).await?;
        let Some(server) = fresh.into_iter().find(|region| region.id == region_id) else {
            return Ok(Resolution::Gone);
        };
        match write {
            Some(write)
                if server.version == write.version && write.fields.is_applied_to(&server) =>
            {
                Ok(Resolution::AlreadyApplied(server))
            }
            _ => Ok(Resolution::Diverged(server)),
        }
    }

    /// Apply a conflict resolution to the cache.
    ///
    /// A vanished region is dropped silently. A diverged one is replaced by
    /// the server copy and reported as [`StoreError::Conflict`].
    pub(crate) async fn settle_conflict(
        &self,
        layout_id: &str,
        region_id: &str,
        op: &'static str,
        resolution: Result<Resolution, RemoteError>,
    ) -> StoreResult<Settled> {
        match resolution {
            Ok(Resolution::Gone) => {
                info!(
                    layout_id,
                    region_id,
                    op,
                    "region no longer exists remotely; dropping local copy"
                );
                self.forget(layout_id, region_id).await;
                Ok(Settled::Gone)
            }
            Ok(Resolution::AlreadyApplied(server)) => {
                debug!(
                    layout_id,
                    region_id,
                    op,
                    version = server.version,
                    "write had landed; acknowledgement was lost"
                );
                let version = server.version;
                self.accept(layout_id, region_id, None, server).await;
                Ok(Settled::Landed(version))
            }
            Ok(Resolution::Diverged(server)) => {
                let server_version = server.version;
                warn!(
                    layout_id,
                    region_id,
                    op,
                    server_version,
                    "region changed elsewhere; reloading it"
                );
                self.inner
                    .debounce
                    .take(&RegionKey::new(layout_id, region_id));
                {
                    let mut layouts = self.inner.layouts.write().await;
                    if let Some(layout) = layouts.get_mut(layout_id) {
                        layout.update_entity(region_id, |_| Some(LocalRegion::Confirmed(server)));
                    }
                }
                let err = StoreError::Conflict {
                    layout_id: layout_id.to_string(),
                    region_id: region_id.to_string(),
                    server_version,
                };
                self.record_error(layout_id, LayoutError::new(op, Some(region_id), &err)).await;
                Err(err)
            }
            Err(e) => {
                error!(
                    layout_id,
                    region_id,
                    op,
                    error = %e,
                    "re-reading after conflict failed; rolling back"
                );
                self.rollback(layout_id, region_id).await;
                self.record_error(layout_id, LayoutError::new(op, Some(region_id), &e)).await;
                Err(e.into())
            }
        }
    }

    /// Take a server copy returned by a successful write.
    pub(crate) async fn accept(
        &self,
        layout_id: &str,
        region_id: &str,
        expected: Option<u64>,
        server: Region,
    ) {
        if let Some(expected) = expected {
            if server.version != expected + 1 {
                warn!(
                    layout_id,
                    region_id,
                    expected,
                    version = server.version,
                    "remote store skipped a version"
                );
            }
        }
        debug!(layout_id, region_id, version = server.version, "write confirmed");
        {
            let mut layouts = self.inner.layouts.write().await;
            if let Some(layout) = layouts.get_mut(layout_id) {
                layout.update_entity(region_id, |entity| Some(entity.rebase(server)));
            }
        }
        self.bump();
    }

    /// Swap a placeholder for the created region and return what is shown.
    pub(crate) async fn confirm_create(
        &self,
        layout_id: &str,
        placeholder: &str,
        server: Region,
    ) -> Region {
        let server_id = server.id.clone();
        let displayed = {
            let mut layouts = self.inner.layouts.write().await;
            // Recorded under the cache lock so id lookups see both or neither.
            if let Err(e) = self.inner.queue.record_remap(placeholder, &server_id) {
                error!(
                    layout_id,
                    placeholder,
                    region_id = %server_id,
                    error = %e,
                    "placeholder remap not recorded"
                );
            }
            layouts.get_mut(layout_id).and_then(|layout| {
                if layout.get(placeholder).is_some() {
                    layout.update_entity(placeholder, |entity| Some(entity.rebase(server.clone())));
                } else {
                    layout.insert(LocalRegion::Confirmed(server.clone()));
                }
                layout.get(&server_id).map(|entity| entity.current().clone())
            })
        };
        self.forget_lock(&RegionKey::new(layout_id, placeholder));
        self.bump();
        displayed.unwrap_or(server)
    }

    async fn rollback(&self, layout_id: &str, region_id: &str) {
        self.inner
            .debounce
            .take(&RegionKey::new(layout_id, region_id));
        {
            let mut layouts = self.inner.layouts.write().await;
            if let Some(layout) = layouts.get_mut(layout_id) {
                layout.update_entity(region_id, LocalRegion::rollback);
            }
        }
        self.bump();
    }

    /// Drop a region from the cache along with its timer and write lock.
    pub(crate) async fn forget(&self, layout_id: &str, region_id: &str) {
        let key = RegionKey::new(layout_id, region_id);
        self.inner.debounce.take(&key);
        {
            let mut layouts = self.inner.layouts.write().await;
            if let Some(layout) = layouts.get_mut(layout_id) {
                layout.remove(region_id);
            }
        }
        self.forget_lock(&key);
        self.bump();
    }

    pub(crate) async fn record_error(&self, layout_id: &str, error: LayoutError) {
        {
            let mut layouts = self.inner.layouts.write().await;
            let layout = layouts.entry(layout_id.to_string()).or_default();
            layout.error = Some(error);
        }
        self.bump();
    }

    // ── Helpers ────────────────────────────────────────────────────

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    pub(crate) fn bump(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    async fn active_region(&self, layout_id: &str, region_id: &str) -> StoreResult<Region> {
        require_layout(layout_id)?;
        match self.region(layout_id, region_id).await {
            Some(entity) if entity.is_active() => Ok(entity.current().clone()),
            _ => Err(not_found(layout_id, region_id)),
        }
    }

    fn next_placeholder_id(&self) -> String {
        let n = self.inner.placeholder_seq.fetch_add(1, Ordering::Relaxed);
        format!("tmp-{}-{}", epoch_millis(), n)
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<RegionKey, Arc<AsyncMutex<()>>>> {
        self.inner
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self, key: &RegionKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks().entry(key.clone()).or_default())
    }

    fn forget_lock(&self, key: &RegionKey) {
        self.locks().remove(key);
    }

    fn layout_locks(&self, layout_id: &str) -> Vec<Arc<AsyncMutex<()>>> {
        self.locks()
            .iter()
            .filter(|(key, _)| key.layout_id == layout_id)
            .map(|(_, lock)| Arc::clone(lock))
            .collect()
    }

    /// Acquire a region's write lock.
    ///
    /// If a placeholder's create lands while waiting, the lock of the
    /// server id is taken instead. Returns the id the lock belongs to.
    pub(crate) async fn lock_region(
        &self,
        layout_id: &str,
        region_id: &str,
    ) -> (String, OwnedMutexGuard<()>) {
        let mut id = self.inner.queue.resolve_id(region_id);
        loop {
            let guard = self
                .write_lock(&RegionKey::new(layout_id, &id))
                .lock_owned()
                .await;
            let resolved = self.inner.queue.resolve_id(&id);
            if resolved == id {
                return (id, guard);
            }
            id = resolved;
        }
    }
}

fn require_layout(layout_id: &str) -> StoreResult<()> {
    if layout_id.trim().is_empty() {
        return Err(StoreError::MissingLayout);
    }
    Ok(())
}

fn not_found(layout_id: &str, region_id: &str) -> StoreError {
    StoreError::RegionNotFound {
        layout_id: layout_id.to_string(),
        region_id: region_id.to_string(),
    }
}

fn touches_geometry(patch: &RegionPatch) -> bool {
    patch.grid_row.is_some()
        || patch.grid_col.is_some()
        || patch.row_span.is_some()
        || patch.col_span.is_some()
}

/// Clamp the geometry fields a patch sets, against the region it targets.
///
/// A move is clamped against the (proposed) width; a resize is clamped
/// against the column the region ends up in.
fn clamp_patch(current: &Region, patch: RegionPatch) -> RegionPatch {
    if !touches_geometry(&patch) {
        return patch;
    }
    let proposed = patch.apply_to(current);
    let (row, col) = if patch.grid_row.is_some() || patch.grid_col.is_some() {
        geometry::clamp_position(
            signed(proposed.grid_row),
            signed(proposed.grid_col),
            proposed.col_span.clamp(1, geometry::GRID_COLUMNS),
        )
    } else {
        (current.grid_row, current.grid_col)
    };
    let (row_span, col_span) =
        geometry::clamp_size(signed(proposed.row_span), signed(proposed.col_span), col);
    RegionPatch {
        grid_row: patch.grid_row.map(|_| row),
        grid_col: patch.grid_col.map(|_| col),
        row_span: patch.row_span.map(|_| row_span),
        col_span: patch.col_span.map(|_| col_span),
        ..patch
    }
}

fn signed(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region {
            id: "srv-1".to_string(),
            layout_id: "layout-1".to_string(),
            region_type: "kpi".to_string(),
            grid_row: 2,
            grid_col: 6,
            row_span: 3,
            col_span: 4,
            is_collapsed: false,
            is_locked: false,
            version: 1,
            created_at: 1,
            updated_at: 1,
            deleted_at: None,
        }
    }

    #[test]
    fn clamp_patch_only_touches_set_fields() {
        let patch = clamp_patch(&region(), RegionPatch::position(0, 11));
        assert_eq!(patch, RegionPatch::position(0, 8));

        let column_only = RegionPatch {
            grid_col: Some(12),
            ..RegionPatch::default()
        };
        let patch = clamp_patch(&region(), column_only);
        assert_eq!(patch.grid_col, Some(8));
        assert_eq!(patch.grid_row, None);

        let patch = clamp_patch(&region(), RegionPatch::size(40, 12));
        assert_eq!(patch, RegionPatch::size(20, 6));

        let patch = clamp_patch(&region(), RegionPatch::collapsed(true));
        assert_eq!(patch, RegionPatch::collapsed(true));
    }

    #[test]
    fn layout_id_is_required() {
        assert!(matches!(require_layout(""), Err(StoreError::MissingLayout)));
        assert!(matches!(require_layout("  "), Err(StoreError::MissingLayout)));
        assert!(require_layout("layout-1").is_ok());
    }
}
