use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Addressing handle of one rank's shard.
///
/// Everything another rank needs to reach the shard: where the shard service
/// listens and how many slots it holds. Immutable once exchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ShardHandle {
    pub rank: u32,
    pub http_addr: SocketAddr,
    pub len: u64,
}

/// The wire protocol of the handle exchange (bincode over UDP).
///
/// - `Announce`: a rank publishing its handle to the coordinator (rank 0).
///   Resent periodically until the full table arrives.
/// - `Handles`: the complete, rank-ordered handle table sent back by the
///   coordinator.
/// - `Reject`: the coordinator refusing an announce that does not fit the
///   process group (wrong group size, rank out of range, rank taken).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RendezvousMessage {
    Announce {
        handle: ShardHandle,
        rank_count: u32,
    },

    Handles {
        handles: Vec<ShardHandle>,
    },

    Reject {
        reason: String,
    },
}
