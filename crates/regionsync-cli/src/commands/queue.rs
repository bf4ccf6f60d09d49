//! `regionsync queue`: inspect and edit a durable offline queue.
//!
//! The queue file is locked by redb while a client has it open; run these
//! against a stopped client.

use std::path::Path;

use anyhow::{Context, Result, bail};
use regionsync_queue::{OfflineQueue, QueueEntry};
use tracing::info;

fn open(path: &Path) -> Result<OfflineQueue> {
    if !path.is_file() {
        bail!("queue file not found: {}", path.display());
    }
    OfflineQueue::open(path).with_context(|| format!("opening queue {}", path.display()))
}

pub fn list(path: &Path, layout: Option<&str>) -> Result<()> {
    let queue = open(path)?;
    let entries = match layout {
        Some(layout_id) => queue.pending_for_layout(layout_id),
        None => queue.pending(),
    };
    for line in render(&entries)? {
        println!("{line}");
    }
    Ok(())
}

pub fn drop_entry(path: &Path, seq: u64) -> Result<()> {
    let queue = open(path)?;
    if !queue.remove(seq)? {
        bail!("no pending mutation with seq {seq}");
    }
    info!(seq, remaining = queue.len(), "queued mutation dropped");
    println!("✓ Dropped mutation {seq}");
    Ok(())
}

pub fn purge(path: &Path) -> Result<()> {
    let queue = open(path)?;
    let removed = queue.clear()?;
    info!(removed, "offline queue purged");
    println!("✓ Purged {removed} pending mutation(s)");
    Ok(())
}

/// One JSON document per entry.
fn render(entries: &[QueueEntry]) -> Result<Vec<String>> {
    entries
        .iter()
        .map(|entry| serde_json::to_string(entry).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regionsync_queue::{MutationKind, QueuedMutation};

    fn seeded_queue(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("queue.redb");
        let queue = OfflineQueue::open(&path).unwrap();
        queue.enqueue(QueuedMutation::new(
            MutationKind::Update,
            "layout-1",
            Some("a"),
            serde_json::json!({ "patch": { "is_locked": true } }),
        ));
        queue.enqueue(QueuedMutation::new(
            MutationKind::Delete,
            "layout-2",
            Some("b"),
            serde_json::json!({ "expected_version": 3 }),
        ));
        path
    }

    #[test]
    fn render_emits_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = OfflineQueue::open(&seeded_queue(dir.path())).unwrap();

        let lines = render(&queue.pending()).unwrap();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["type"], "update");
        assert_eq!(first["layout_id"], "layout-1");
        assert!(first["seq"].is_u64());
    }

    #[test]
    fn drop_and_purge_edit_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_queue(dir.path());
        let first = OfflineQueue::open(&path).unwrap().pending()[0].seq;

        drop_entry(&path, first).unwrap();
        assert_eq!(OfflineQueue::open(&path).unwrap().len(), 1);
        assert!(drop_entry(&path, first).is_err());

        purge(&path).unwrap();
        assert!(OfflineQueue::open(&path).unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list(&dir.path().join("nope.redb"), None).is_err());
    }
}
