//! Offline queue: recording mutations and replaying them in order.
//!
//! Replay walks the queue in sequence order. Entries for one region form a
//! stream; when an entry fails, later entries of the same stream are held
//! back (an update must not run before its create lands) while other
//! streams continue. Failed and held entries stay queued for the next
//! pass. Losing connectivity mid-pass holds everything that is left.
//!
//! A queued write expects the version recorded when it was queued. When a
//! replayed write lands, later entries of its stream are moved to the new
//! version, so a failure mid-stream resumes from the right version on the
//! next pass.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error, info, warn};

use regionsync_core::{NewRegion, RegionPatch, RegionWrite, WriteOutcome};
use regionsync_queue::{MutationKind, QueueEntry, QueuedMutation};
use regionsync_remote::RemoteError;

use crate::error::{StoreError, StoreResult};
use crate::store::{RegionStore, Settled};

/// Queued payload of an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UpdatePayload {
    pub patch: RegionPatch,
    /// Version the region had when the update was queued.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Queued payload of a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeletePayload {
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Counts of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Entries that took effect remotely (or already had).
    pub applied: usize,
    /// Entries that failed; they stay queued.
    pub failed: usize,
    /// Entries held back behind a failure, or because the store went offline.
    pub skipped: usize,
    /// Updates and deletes that lost against another session's edit.
    pub conflicts: usize,
    /// Entries dropped without effect: unreadable, or their region is gone.
    pub discarded: usize,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.conflicts == 0
    }
}

enum Replayed {
    Applied,
    Conflict,
    Discarded,
}

impl RegionStore {
    /// Replay queued mutations in submission order.
    pub async fn replay_offline_queue(&self) -> StoreResult<ReplayReport> {
        self.ensure_open()?;
        let _pass = self.inner.replay_lock.lock().await;

        let mut report = ReplayReport::default();
        let mut blocked: HashSet<String> = HashSet::new();
        // Versions confirmed earlier in this pass, by server id.
        let mut versions: HashMap<String, u64> = HashMap::new();
        let mut cursor = None;

        while let Some(entry) = self.inner.queue.next_after(cursor) {
            cursor = Some(entry.seq);
            let stream = entry.mutation.stream_key();
            if !self.is_online() || blocked.contains(&stream) {
                report.skipped += 1;
                continue;
            }

            match self.replay_entry(&entry, &mut versions).await {
                Ok(replayed) => {
                    match replayed {
                        Replayed::Applied => report.applied += 1,
                        Replayed::Conflict => report.conflicts += 1,
                        Replayed::Discarded => report.discarded += 1,
                    }
                    self.inner.queue.remove(entry.seq)?;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        seq = entry.seq,
                        layout_id = %entry.mutation.layout_id,
                        region_id = ?entry.mutation.resource_id,
                        kind = ?entry.mutation.kind,
                        error = %e,
                        "replay failed; holding later changes to this region"
                    );
                    blocked.insert(stream);
                    if matches!(e, StoreError::Remote(RemoteError::Offline)) {
                        self.go_offline();
                    }
                }
            }
        }

        info!(
            applied = report.applied,
            failed = report.failed,
            skipped = report.skipped,
            conflicts = report.conflicts,
            discarded = report.discarded,
            remaining = self.inner.queue.len(),
            "offline queue replayed"
        );
        self.bump();
        Ok(report)
    }

    async fn replay_entry(
        &self,
        entry: &QueueEntry,
        versions: &mut HashMap<String, u64>,
    ) -> StoreResult<Replayed> {
        let mutation = &entry.mutation;
        let layout_id = mutation.layout_id.as_str();
        let Some(queued_id) = mutation.resource_id.as_deref() else {
            error!(
                layout_id,
                kind = ?mutation.kind,
                "queued mutation has no region id; discarding"
            );
            return Ok(Replayed::Discarded);
        };
        let (region_id, _guard) = self.lock_region(layout_id, queued_id).await;

        match mutation.kind {
            MutationKind::Create => {
                if region_id != queued_id {
                    debug!(
                        layout_id,
                        placeholder = queued_id,
                        region_id = %region_id,
                        "create already confirmed"
                    );
                    return Ok(Replayed::Applied);
                }
                let Some(new_region) = decode::<NewRegion>(mutation) else {
                    return Ok(Replayed::Discarded);
                };
                let server = self.inner.remote.create(layout_id, &new_region).await?;
                info!(
                    layout_id,
                    placeholder = queued_id,
                    region_id = %server.id,
                    "queued create replayed"
                );
                versions.insert(server.id.clone(), server.version);
                self.advance_stream(entry, None, server.version);
                self.confirm_create(layout_id, queued_id, server).await;
                Ok(Replayed::Applied)
            }
            MutationKind::Update => {
                let Some(payload) = decode::<UpdatePayload>(mutation) else {
                    return Ok(Replayed::Discarded);
                };
                let known = self
                    .known_version(layout_id, &region_id, versions, payload.expected_version)
                    .await?;
                let Some(expected) = known else {
                    info!(
                        layout_id,
                        region_id = %region_id,
                        "region no longer exists; dropping queued update"
                    );
                    self.forget(layout_id, &region_id).await;
                    return Ok(Replayed::Discarded);
                };

                let write = RegionWrite::new(expected, payload.patch);
                match self.inner.remote.update(layout_id, &region_id, &write).await? {
                    WriteOutcome::Applied(server) => {
                        versions.insert(region_id.clone(), server.version);
                        self.advance_stream(entry, payload.expected_version, server.version);
                        self.accept(layout_id, &region_id, Some(expected), server).await;
                        Ok(Replayed::Applied)
                    }
                    WriteOutcome::NoMatchingRow => {
                        let resolution = self
                            .resolve_conflict(layout_id, &region_id, Some(&write))
                            .await;
                        let settled = self
                            .settle_replayed(layout_id, &region_id, "update", resolution, versions)
                            .await?;
                        if matches!(settled, Replayed::Applied) {
                            if let Some(version) = versions.get(&region_id).copied() {
                                self.advance_stream(entry, payload.expected_version, version);
                            }
                        }
                        Ok(settled)
                    }
                }
            }
            MutationKind::Delete => {
                let Some(payload) = decode::<DeletePayload>(mutation) else {
                    return Ok(Replayed::Discarded);
                };
                let known = self
                    .known_version(layout_id, &region_id, versions, payload.expected_version)
                    .await?;
                let Some(expected) = known else {
                    info!(layout_id, region_id = %region_id, "region already deleted remotely");
                    self.forget(layout_id, &region_id).await;
                    return Ok(Replayed::Applied);
                };

                match self.inner.remote.delete(layout_id, &region_id, expected).await? {
                    WriteOutcome::Applied(()) => {
                        info!(layout_id, region_id = %region_id, "queued delete replayed");
                        versions.remove(&region_id);
                        self.forget(layout_id, &region_id).await;
                        Ok(Replayed::Applied)
                    }
                    WriteOutcome::NoMatchingRow => {
                        let resolution = self.resolve_conflict(layout_id, &region_id, None).await;
                        self.settle_replayed(layout_id, &region_id, "delete", resolution, versions)
                            .await
                    }
                }
            }
        }
    }

    async fn settle_replayed(
        &self,
        layout_id: &str,
        region_id: &str,
        op: &'static str,
        resolution: Result<crate::store::Resolution, RemoteError>,
        versions: &mut HashMap<String, u64>,
    ) -> StoreResult<Replayed> {
        match self.settle_conflict(layout_id, region_id, op, resolution).await {
            Ok(Settled::Landed(version)) => {
                versions.insert(region_id.to_string(), version);
                Ok(Replayed::Applied)
            }
            // A delete that finds nothing has done its job.
            Ok(Settled::Gone) if op == "delete" => Ok(Replayed::Applied),
            Ok(Settled::Gone) => Ok(Replayed::Discarded),
            // Later entries of the stream were made against the same stale
            // version and conflict in turn.
            Err(StoreError::Conflict { .. }) => Ok(Replayed::Conflict),
            Err(e) => Err(e),
        }
    }

    /// Version to expect for a queued write.
    ///
    /// The version recorded at enqueue time wins: a reload since then may
    /// carry another session's write, which must surface as a conflict.
    /// Without one (writes queued against an unconfirmed insert) this
    /// pass's confirmations are used, then the cache, and finally the
    /// remote store. `None` means the region does not exist remotely.
    async fn known_version(
        &self,
        layout_id: &str,
        region_id: &str,
        versions: &HashMap<String, u64>,
        queued: Option<u64>,
    ) -> StoreResult<Option<u64>> {
        if let Some(version) = queued.or_else(|| versions.get(region_id).copied()) {
            return Ok(Some(version));
        }
        let cached = {
            let layouts = self.inner.layouts.read().await;
            layouts
                .get(layout_id)
                .and_then(|layout| layout.get(region_id))
                .and_then(|entity| entity.expected_version())
        };
        if let Some(version) = cached {
            return Ok(Some(version));
        }
        let fresh = self.inner.remote.list(layout_id).await?;
        Ok(fresh
            .into_iter()
            .find(|region| region.id == region_id)
            .map(|region| region.version))
    }

    /// Point later queued writes of `entry`'s region that expected `from`
    /// at the version its replay produced.
    fn advance_stream(&self, entry: &QueueEntry, from: Option<u64>, to: u64) {
        let stream = entry.mutation.stream_key();
        for later in self.inner.queue.pending() {
            if later.seq <= entry.seq || later.mutation.stream_key() != stream {
                continue;
            }
            let Some(mutation) = with_expected_version(&later.mutation, from, to) else {
                continue;
            };
            match self.inner.queue.replace(later.seq, mutation) {
                Ok(_) => debug!(seq = later.seq, version = to, "queued write advanced"),
                Err(e) => warn!(seq = later.seq, error = %e, "queued write not advanced"),
            }
        }
    }

    // ── Enqueue ────────────────────────────────────────────────────

    pub(crate) fn enqueue_create(&self, layout_id: &str, placeholder: &str, region: &NewRegion) {
        self.enqueue(MutationKind::Create, layout_id, placeholder, to_json(region));
    }

    pub(crate) fn enqueue_update(
        &self,
        layout_id: &str,
        region_id: &str,
        patch: &RegionPatch,
        expected_version: Option<u64>,
    ) {
        let payload = UpdatePayload {
            patch: patch.clone(),
            expected_version,
        };
        self.enqueue(MutationKind::Update, layout_id, region_id, to_json(&payload));
    }

    pub(crate) fn enqueue_delete(
        &self,
        layout_id: &str,
        region_id: &str,
        expected_version: Option<u64>,
    ) {
        let payload = DeletePayload { expected_version };
        self.enqueue(MutationKind::Delete, layout_id, region_id, to_json(&payload));
    }

    fn enqueue(
        &self,
        kind: MutationKind,
        layout_id: &str,
        region_id: &str,
        data: serde_json::Value,
    ) {
        let seq = self
            .inner
            .queue
            .enqueue(QueuedMutation::new(kind, layout_id, Some(region_id), data));
        info!(seq, layout_id, region_id, ?kind, "offline; change queued");
        self.bump();
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!(error = %e, "queued payload not serializable");
        serde_json::Value::Null
    })
}

/// `mutation` expecting `to` instead of `from`; `None` when it expects
/// something else or carries no version.
fn with_expected_version(
    mutation: &QueuedMutation,
    from: Option<u64>,
    to: u64,
) -> Option<QueuedMutation> {
    let data = match mutation.kind {
        MutationKind::Create => return None,
        MutationKind::Update => {
            let mut payload: UpdatePayload = serde_json::from_value(mutation.data.clone()).ok()?;
            if payload.expected_version != from {
                return None;
            }
            payload.expected_version = Some(to);
            to_json(&payload)
        }
        MutationKind::Delete => {
            let mut payload: DeletePayload = serde_json::from_value(mutation.data.clone()).ok()?;
            if payload.expected_version != from {
                return None;
            }
            payload.expected_version = Some(to);
            to_json(&payload)
        }
    };
    Some(QueuedMutation {
        data,
        ..mutation.clone()
    })
}

fn decode<T: DeserializeOwned>(mutation: &QueuedMutation) -> Option<T> {
    match serde_json::from_value(mutation.data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                layout_id = %mutation.layout_id,
                region_id = ?mutation.resource_id,
                kind = ?mutation.kind,
                error = %e,
                "queued payload unreadable; discarding"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_payload_tolerates_missing_version() {
        let payload: UpdatePayload =
            serde_json::from_value(serde_json::json!({ "patch": { "grid_row": 3 } })).unwrap();
        assert_eq!(payload.patch.grid_row, Some(3));
        assert_eq!(payload.expected_version, None);
    }

    #[test]
    fn unreadable_payload_is_rejected() {
        let mutation = QueuedMutation::new(
            MutationKind::Create,
            "layout-1",
            Some("tmp-1"),
            serde_json::json!({ "region_type": 5 }),
        );
        assert!(decode::<NewRegion>(&mutation).is_none());
    }

    #[test]
    fn clean_report() {
        assert!(ReplayReport::default().is_clean());
        let report = ReplayReport {
            applied: 2,
            skipped: 1,
            ..ReplayReport::default()
        };
        assert!(!report.is_clean());
    }
}
