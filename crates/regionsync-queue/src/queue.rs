//! OfflineQueue: durable FIFO of mutations awaiting connectivity.
//!
//! Entries live in two places: an in-memory mirror that every read is
//! served from, and a redb log keyed by sequence number. Enqueue always
//! succeeds against the mirror; the durable write is best effort and a
//! failure is logged rather than returned. The queue supports both on-disk
//! and in-memory backends (the latter for testing).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, error, warn};

use crate::error::{QueueError, QueueResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `QueueError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| QueueError::$variant(e.to_string())
    };
}

#[derive(Default)]
struct Mirror {
    pending: BTreeMap<u64, QueuedMutation>,
    remap: HashMap<String, String>,
    next_seq: u64,
}

struct QueueInner {
    db: Database,
    mirror: Mutex<Mirror>,
}

/// Thread-safe offline queue backed by redb.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl OfflineQueue {
    /// Open (or create) a persistent queue at the given path.
    ///
    /// Entries left over from a previous process are loaded and replay in
    /// their original order.
    pub fn open(path: &Path) -> QueueResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let queue = Self::from_db(db)?;
        debug!(?path, pending = queue.len(), "offline queue opened");
        Ok(queue)
    }

    /// Create an ephemeral in-memory queue (for testing).
    pub fn open_in_memory() -> QueueResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let queue = Self::from_db(db)?;
        debug!("in-memory offline queue opened");
        Ok(queue)
    }

    fn from_db(db: Database) -> QueueResult<Self> {
        ensure_tables(&db)?;
        let mirror = load_mirror(&db)?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                db,
                mirror: Mutex::new(mirror),
            }),
        })
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.inner
            .mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Pending mutations ──────────────────────────────────────────

    /// Append a mutation and return its sequence number.
    ///
    /// Never fails: if the durable write does not go through, the entry is
    /// still queued in memory and will replay in this process.
    pub fn enqueue(&self, mutation: QueuedMutation) -> u64 {
        // Persisted under the mirror lock so a concurrent remove of this seq
        // cannot land before the insert and leave the row behind on disk.
        let mut mirror = self.mirror();
        let seq = mirror.next_seq;
        mirror.next_seq += 1;
        let persisted = self.persist(seq, &mutation);
        mirror.pending.insert(seq, mutation.clone());
        drop(mirror);

        if let Err(e) = persisted {
            error!(
                seq,
                layout_id = %mutation.layout_id,
                resource_id = ?mutation.resource_id,
                error = %e,
                "offline mutation not persisted; kept in memory only"
            );
        } else {
            debug!(
                seq,
                kind = ?mutation.kind,
                resource_id = ?mutation.resource_id,
                "mutation queued"
            );
        }
        seq
    }

    fn persist(&self, seq: u64, mutation: &QueuedMutation) -> QueueResult<()> {
        let value = serde_json::to_vec(mutation).map_err(map_err!(Serialize))?;
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PENDING).map_err(map_err!(Table))?;
            table
                .insert(seq, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Snapshot of all pending entries in FIFO order.
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.mirror()
            .pending
            .iter()
            .map(|(seq, mutation)| QueueEntry {
                seq: *seq,
                mutation: mutation.clone(),
            })
            .collect()
    }

    /// Pending entries targeting a single layout, in FIFO order.
    pub fn pending_for_layout(&self, layout_id: &str) -> Vec<QueueEntry> {
        self.pending()
            .into_iter()
            .filter(|entry| entry.mutation.layout_id == layout_id)
            .collect()
    }

    /// The first entry after `after` (or the head when `None`).
    ///
    /// Entries enqueued while a replay walks the queue are still reached.
    pub fn next_after(&self, after: Option<u64>) -> Option<QueueEntry> {
        let mirror = self.mirror();
        let mut range = match after {
            Some(seq) => mirror.pending.range(seq + 1..),
            None => mirror.pending.range(..),
        };
        range.next().map(|(seq, mutation)| QueueEntry {
            seq: *seq,
            mutation: mutation.clone(),
        })
    }

    /// Whether any entry still targets `resource_id`.
    pub fn contains_resource(&self, resource_id: &str) -> bool {
        self.mirror()
            .pending
            .values()
            .any(|m| m.resource_id.as_deref() == Some(resource_id))
    }

    /// Remove an entry after it replayed. Returns true if it existed.
    pub fn remove(&self, seq: u64) -> QueueResult<bool> {
        let mut mirror = self.mirror();
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PENDING).map_err(map_err!(Table))?;
            table.remove(seq).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let existed = mirror.pending.remove(&seq).is_some();
        drop(mirror);
        debug!(seq, existed, "queued mutation removed");
        Ok(existed)
    }

    /// Rewrite a pending entry in place, keeping its position. Returns
    /// false if the entry is gone.
    pub fn replace(&self, seq: u64, mutation: QueuedMutation) -> QueueResult<bool> {
        let mut mirror = self.mirror();
        let Some(slot) = mirror.pending.get_mut(&seq) else {
            return Ok(false);
        };
        self.persist(seq, &mutation)?;
        *slot = mutation;
        Ok(true)
    }

    /// Drop every entry targeting `resource_id`. Returns the number removed.
    pub fn remove_resource(&self, resource_id: &str) -> QueueResult<usize> {
        let seqs: Vec<u64> = self
            .mirror()
            .pending
            .iter()
            .filter(|(_, m)| m.resource_id.as_deref() == Some(resource_id))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &seqs {
            self.remove(*seq)?;
        }
        Ok(seqs.len())
    }

    /// Drop every entry. Returns the number removed.
    pub fn clear(&self) -> QueueResult<usize> {
        let mut mirror = self.mirror();
        let seqs: Vec<u64> = mirror.pending.keys().copied().collect();
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PENDING).map_err(map_err!(Table))?;
            for seq in &seqs {
                table.remove(*seq).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        mirror.pending.clear();
        drop(mirror);
        if !seqs.is_empty() {
            warn!(count = seqs.len(), "offline queue cleared");
        }
        Ok(seqs.len())
    }

    pub fn len(&self) -> usize {
        self.mirror().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror().pending.is_empty()
    }

    // ── Placeholder ids ────────────────────────────────────────────

    /// Record the server id that replaced a placeholder.
    pub fn record_remap(&self, placeholder: &str, server_id: &str) -> QueueResult<()> {
        let txn = self.inner.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ID_REMAP).map_err(map_err!(Table))?;
            table
                .insert(placeholder, server_id)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.mirror()
            .remap
            .insert(placeholder.to_string(), server_id.to_string());
        debug!(%placeholder, %server_id, "placeholder id remapped");
        Ok(())
    }

    /// Map a placeholder to its server id; other ids come back unchanged.
    pub fn resolve_id(&self, id: &str) -> String {
        self.mirror()
            .remap
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

/// Create all tables if they don't exist yet.
fn ensure_tables(db: &Database) -> QueueResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    // Opening a table in a write transaction creates it if absent.
    txn.open_table(PENDING).map_err(map_err!(Table))?;
    txn.open_table(ID_REMAP).map_err(map_err!(Table))?;
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

fn load_mirror(db: &Database) -> QueueResult<Mirror> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let mut mirror = Mirror::default();

    let table = txn.open_table(PENDING).map_err(map_err!(Table))?;
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        let mutation: QueuedMutation =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        mirror.pending.insert(key.value(), mutation);
    }
    mirror.next_seq = mirror.pending.keys().next_back().map_or(0, |seq| seq + 1);

    let remap = txn.open_table(ID_REMAP).map_err(map_err!(Table))?;
    for entry in remap.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        mirror
            .remap
            .insert(key.value().to_string(), value.value().to_string());
    }

    Ok(mirror)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(resource_id: &str, row: u32) -> QueuedMutation {
        QueuedMutation::new(
            MutationKind::Update,
            "layout-1",
            Some(resource_id),
            json!({ "patch": { "grid_row": row }, "expected_version": 1 }),
        )
    }

    #[test]
    fn enqueue_preserves_fifo_order() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let a = queue.enqueue(update("a", 1));
        let b = queue.enqueue(update("b", 2));
        let c = queue.enqueue(update("c", 3));

        assert!(a < b && b < c);
        let ids: Vec<_> = queue
            .pending()
            .into_iter()
            .map(|e| e.mutation.resource_id.unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn cursor_walks_entries_added_midway() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let a = queue.enqueue(update("a", 1));

        let first = queue.next_after(None).unwrap();
        assert_eq!(first.seq, a);
        assert!(queue.next_after(Some(a)).is_none());

        let b = queue.enqueue(update("b", 1));
        assert_eq!(queue.next_after(Some(a)).unwrap().seq, b);
        assert!(queue.contains_resource("b"));
        assert!(!queue.contains_resource("zzz"));
    }

    #[test]
    fn remove_single_entry() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let seq = queue.enqueue(update("a", 1));
        queue.enqueue(update("b", 1));

        assert!(queue.remove(seq).unwrap());
        assert!(!queue.remove(seq).unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_resource_drops_whole_stream() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        queue.enqueue(update("a", 1));
        queue.enqueue(update("b", 1));
        queue.enqueue(update("a", 2));

        assert_eq!(queue.remove_resource("a").unwrap(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].mutation.resource_id.as_deref(), Some("b"));
    }

    #[test]
    fn clear_empties_queue() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        queue.enqueue(update("a", 1));
        queue.enqueue(update("b", 1));

        assert_eq!(queue.clear().unwrap(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear().unwrap(), 0);
    }

    #[test]
    fn resolve_id_follows_remap() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        assert_eq!(queue.resolve_id("tmp-1"), "tmp-1");

        queue.record_remap("tmp-1", "srv-9").unwrap();
        assert_eq!(queue.resolve_id("tmp-1"), "srv-9");
        assert_eq!(queue.resolve_id("srv-9"), "srv-9");
    }

    #[test]
    fn pending_for_layout_filters() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        queue.enqueue(update("a", 1));
        queue.enqueue(QueuedMutation::new(
            MutationKind::Delete,
            "layout-2",
            Some("x"),
            json!({ "expected_version": 4 }),
        ));

        assert_eq!(queue.pending_for_layout("layout-1").len(), 1);
        assert_eq!(queue.pending_for_layout("layout-2").len(), 1);
        assert!(queue.pending_for_layout("nope").is_empty());
    }

    #[test]
    fn replace_keeps_position() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let a = queue.enqueue(update("a", 1));
        queue.enqueue(update("b", 1));

        assert!(queue.replace(a, update("a", 7)).unwrap());
        let pending = queue.pending();
        assert_eq!(pending[0].seq, a);
        assert_eq!(pending[0].mutation.data["patch"]["grid_row"], 7);

        queue.remove(a).unwrap();
        assert!(!queue.replace(a, update("a", 8)).unwrap());
        assert_eq!(queue.len(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.redb");

        {
            let queue = OfflineQueue::open(&db_path).unwrap();
            queue.enqueue(update("a", 1));
            let seq = queue.enqueue(update("b", 2));
            queue.enqueue(update("c", 3));
            queue.remove(seq).unwrap();
            queue.record_remap("tmp-1", "srv-1").unwrap();
        }

        // Reopen the same database file.
        let queue = OfflineQueue::open(&db_path).unwrap();
        let pending = queue.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].mutation.resource_id.as_deref(), Some("a"));
        assert_eq!(pending[1].mutation.resource_id.as_deref(), Some("c"));
        assert_eq!(queue.resolve_id("tmp-1"), "srv-1");

        // New entries sort after the survivors.
        let next = queue.enqueue(update("d", 4));
        assert!(next > pending[1].seq);
    }

    #[test]
    fn replace_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.redb");
        let seq = {
            let queue = OfflineQueue::open(&db_path).unwrap();
            let seq = queue.enqueue(update("a", 1));
            queue.replace(seq, update("a", 5)).unwrap();
            seq
        };

        let queue = OfflineQueue::open(&db_path).unwrap();
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, seq);
        assert_eq!(pending[0].mutation.data["patch"]["grid_row"], 5);
    }

    #[test]
    fn concurrent_enqueue_and_remove_agree_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.redb");
        let queue = OfflineQueue::open(&db_path).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.enqueue(update(&format!("w{w}"), i));
                    }
                })
            })
            .collect();
        let reaper = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for _ in 0..150 {
                    if let Some(entry) = queue.next_after(None) {
                        queue.remove(entry.seq).unwrap();
                    }
                }
            })
        };
        for writer in writers {
            writer.join().unwrap();
        }
        reaper.join().unwrap();

        let live: Vec<u64> = queue.pending().into_iter().map(|e| e.seq).collect();
        drop(queue);
        let reopened = OfflineQueue::open(&db_path).unwrap();
        let persisted: Vec<u64> = reopened.pending().into_iter().map(|e| e.seq).collect();
        assert_eq!(persisted, live);
    }
}
