//! Shard Service Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) a rank uses to
//! reach a shard it does not own.
//!
//! Every request names a local offset inside the serving rank's shard; the
//! caller has already resolved the global slot through the partition map.
//! Records travel as JSON strings so the DTOs stay independent of the record
//! type.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Atomic compare-and-swap on an occupancy word.
pub const ENDPOINT_COMPARE_EXCHANGE: &str = "/internal/slot/compare_exchange";
/// Atomic load of an occupancy word (`/internal/slot/:offset`).
pub const ENDPOINT_LOAD: &str = "/internal/slot";
/// One-sided read of a record cell (`/internal/record/:offset`).
pub const ENDPOINT_READ: &str = "/internal/record";
/// One-sided write of a record cell.
pub const ENDPOINT_WRITE: &str = "/internal/record";
/// Shard length and occupancy, for diagnostics.
pub const ENDPOINT_SHARD_INFO: &str = "/internal/shard";

// --- Data Transfer Objects ---

/// Payload of an atomic compare-and-swap.
///
/// Sent exactly once per claim attempt. A repeated CAS after a lost response
/// would observe its own earlier success as a conflict.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompareExchangeRequest {
    pub offset: u64,
    pub current: u32,
    pub new: u32,
}

/// The occupancy word as observed by the operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct WordResponse {
    pub value: u32,
}

/// Result of a record read.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResponse {
    /// `None` while the slot is free or its claimer has not written yet.
    pub record_json: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteRequest {
    pub offset: u64,
    /// The serialized JSON string of the record.
    pub record_json: String,
}

/// Acknowledgment for write operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardInfoResponse {
    pub rank: u32,
    pub len: u64,
    pub occupied: u64,
}
