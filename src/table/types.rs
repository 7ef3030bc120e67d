use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Occupancy word of a slot nobody has claimed yet.
pub const SLOT_FREE: u32 = 0;
/// Occupancy word of a claimed slot. Terminal for the table's lifetime.
pub const SLOT_OCCUPIED: u32 = 1;

/// Key contract required by the table: equality plus a hash that every
/// rank computes identically for the same key.
pub trait TableKey: Eq + Clone + Send + Sync + 'static {
    fn slot_hash(&self) -> u64;
}

/// A fixed-size record stored in one slot.
///
/// The table never looks inside a record beyond `key()`. Records cross
/// process boundaries on the networked transport, hence the serde bounds.
pub trait TableRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Key: TableKey;

    fn key(&self) -> &Self::Key;
}

/// Physical location of a global slot: the owning rank and the offset
/// inside that rank's shard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotAddr {
    pub rank: u32,
    pub offset: u64,
}

/// Snapshot of the probe counters kept by a table handle on one rank.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeStats {
    pub inserts: u64,
    pub failed_inserts: u64,
    pub finds: u64,
    pub find_misses: u64,
    /// Slots visited by all inserts and finds, including the hit.
    pub probes: u64,
}

impl ProbeStats {
    /// Average number of slots visited per operation.
    pub fn mean_probe_length(&self) -> f64 {
        let ops = self.inserts + self.failed_inserts + self.finds;
        if ops == 0 {
            return 0.0;
        }
        self.probes as f64 / ops as f64
    }
}
