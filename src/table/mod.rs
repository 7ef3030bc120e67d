//! Distributed Hash Table Module
//!
//! Fixed-capacity open-addressing table whose slots are spread over the ranks
//! of a process group.
//!
//! ## Core Concepts
//! - **Partitioning**: `PartitionMap` splits the global slot range into one
//!   contiguous shard per rank and is the only place slot addresses are
//!   computed.
//! - **Reservation**: a slot is taken by a single cluster-wide compare-and-swap
//!   of its occupancy word (free -> occupied). Occupancy never reverts.
//! - **Probing**: insert and find walk the same linear probe sequence from
//!   `hash mod capacity`, wrapping once around the table at most. Find stops at
//!   the first free slot.
//! - **Claim before write**: a record is written only by the rank whose claim
//!   succeeded, after the claim.

pub mod map;
pub mod partitioner;
pub mod probe;
pub mod reservation;
pub mod types;
