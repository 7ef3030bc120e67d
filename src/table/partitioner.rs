use super::types::SlotAddr;

use anyhow::Result;
use std::ops::Range;

/// Static mapping from global slot indices to (rank, offset) pairs.
///
/// Shards are contiguous runs of `stride = ceil(capacity / rank_count)`
/// slots. The last non-empty shard takes the remainder, so the shard lengths
/// always sum to exactly `capacity`. With very few slots per rank the
/// trailing ranks can end up owning nothing (e.g. 5 slots over 4 ranks gives
/// 2, 2, 1, 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMap {
    capacity: u64,
    rank_count: u32,
    stride: u64,
}

impl PartitionMap {
    pub fn new(capacity: u64, rank_count: u32) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!("Table capacity must be at least one slot");
        }
        if rank_count == 0 {
            anyhow::bail!("Rank count must be at least one");
        }

        let stride = capacity.div_ceil(rank_count as u64);

        Ok(Self {
            capacity,
            rank_count,
            stride,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn rank_count(&self) -> u32 {
        self.rank_count
    }

    /// Slots per shard for every rank except the one holding the remainder.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// First slot of the probe sequence for a key hash.
    pub fn start_slot(&self, hash: u64) -> u64 {
        hash % self.capacity
    }

    pub fn owning_rank(&self, slot: u64) -> u32 {
        self.check_slot(slot);
        (slot / self.stride) as u32
    }

    pub fn local_offset(&self, slot: u64) -> u64 {
        self.check_slot(slot);
        slot % self.stride
    }

    pub fn locate(&self, slot: u64) -> SlotAddr {
        SlotAddr {
            rank: self.owning_rank(slot),
            offset: self.local_offset(slot),
        }
    }

    /// Global slots owned by `rank`. Empty for ranks past the last shard.
    pub fn shard_range(&self, rank: u32) -> Range<u64> {
        assert!(
            rank < self.rank_count,
            "rank {} outside of process group of {}",
            rank,
            self.rank_count
        );
        let start = (rank as u64 * self.stride).min(self.capacity);
        let end = (start + self.stride).min(self.capacity);
        start..end
    }

    pub fn shard_len(&self, rank: u32) -> u64 {
        let range = self.shard_range(rank);
        range.end - range.start
    }

    fn check_slot(&self, slot: u64) {
        assert!(
            slot < self.capacity,
            "slot {} outside of table of {} slots",
            slot,
            self.capacity
        );
    }
}
