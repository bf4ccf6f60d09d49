//! redb table definitions for the offline queue.

use redb::TableDefinition;

/// Pending mutations keyed by a monotonically increasing sequence number.
/// Values are JSON-serialized `QueuedMutation`s.
pub const PENDING: TableDefinition<u64, &[u8]> = TableDefinition::new("pending_mutations");

/// Placeholder id → server-assigned id, recorded once a queued create lands.
pub const ID_REMAP: TableDefinition<&str, &str> = TableDefinition::new("id_remap");
