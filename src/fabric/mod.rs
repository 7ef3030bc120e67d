//! Remote Memory Fabric
//!
//! Gives every rank uniform access to every shard of the table, wherever the
//! shard physically lives.
//!
//! ## Core Concepts
//! - **Shard**: the occupancy words and write-once record cells a rank owns.
//! - **Fabric**: the per-rank handle set. Exposes one-sided `read`/`write` on
//!   record cells and atomic `compare_exchange`/`load` on occupancy words,
//!   addressed by [`SlotAddr`].
//! - **Process group**: the collective bootstrap that publishes the local
//!   shard and hands back a fabric reaching all shards. It runs exactly once.
//!
//! Two transports are provided: `local` (ranks are tasks of one process and
//! share shard pointers) and `remote` (ranks are separate processes; each
//! serves its shard over HTTP and handles are exchanged by the
//! [`rendezvous`](crate::rendezvous) service).

pub mod handlers;
pub mod local;
pub mod protocol;
pub mod remote;
pub mod shard;

#[cfg(test)]
mod tests;

use crate::table::types::SlotAddr;
use anyhow::Result;
use shard::Shard;
use std::future::Future;
use std::sync::Arc;

/// Handle set through which one rank addresses every shard of the table.
pub trait Fabric<R>: Send + Sync {
    fn rank(&self) -> u32;

    fn rank_count(&self) -> u32;

    /// Shard length announced by `rank` during the handle exchange.
    fn shard_len(&self, rank: u32) -> u64;

    /// Atomically replaces the occupancy word at `addr` with `new` if it holds
    /// `current`. Returns the word observed before the operation.
    fn compare_exchange(
        &self,
        addr: SlotAddr,
        current: u32,
        new: u32,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// Atomic load of the occupancy word at `addr`.
    fn load(&self, addr: SlotAddr) -> impl Future<Output = Result<u32>> + Send;

    /// One-sided read of the record cell at `addr`. `None` while the claimer
    /// has not written its payload yet.
    fn read(&self, addr: SlotAddr) -> impl Future<Output = Result<Option<R>>> + Send;

    /// One-sided write of the record cell at `addr`. The caller must own the
    /// slot through a successful claim.
    fn write(&self, addr: SlotAddr, record: R) -> impl Future<Output = Result<()>> + Send;
}

/// Collective bootstrap shared by all ranks of one table.
pub trait ProcessGroup<R> {
    type Fabric: Fabric<R>;

    fn rank(&self) -> u32;

    fn rank_count(&self) -> u32;

    /// Publishes `shard` to every other rank and resolves once this rank holds
    /// handles for all shards.
    fn establish(self, shard: Arc<Shard<R>>) -> impl Future<Output = Result<Self::Fabric>> + Send;
}
