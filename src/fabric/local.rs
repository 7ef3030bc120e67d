//! In-process transport.
//!
//! Every rank is a task of the same process. Handles are plain shared
//! pointers to the shards, and the handle exchange is a registry every rank
//! publishes into once, then waits on until all shards are in.

use super::shard::Shard;
use super::{Fabric, ProcessGroup};
use crate::table::types::SlotAddr;

use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Meeting point for the ranks of one in-process table.
///
/// Every rank handle must either reach `establish` or be dropped. A handle
/// dropped without publishing its shard abandons the cluster, and every rank
/// still waiting in `establish` fails instead of waiting forever.
pub struct LocalCluster<R> {
    rank_count: u32,
    shards: DashMap<u32, Arc<Shard<R>>>,
    abandoned: AtomicBool,
    changed: Notify,
}

impl<R> LocalCluster<R> {
    pub fn new(rank_count: u32) -> Arc<Self> {
        Arc::new(Self {
            rank_count,
            shards: DashMap::new(),
            abandoned: AtomicBool::new(false),
            changed: Notify::new(),
        })
    }

    pub fn rank_count(&self) -> u32 {
        self.rank_count
    }

    /// Process-group handle for `rank`, to be passed to the table constructor.
    pub fn rank(self: &Arc<Self>, rank: u32) -> LocalRank<R> {
        LocalRank {
            cluster: self.clone(),
            rank,
            published: false,
        }
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }
}

pub struct LocalRank<R> {
    cluster: Arc<LocalCluster<R>>,
    rank: u32,
    published: bool,
}

impl<R> Drop for LocalRank<R> {
    fn drop(&mut self) {
        if !self.published {
            tracing::warn!("Rank {} left before publishing its shard", self.rank);
            self.cluster.abandon();
        }
    }
}

impl<R> ProcessGroup<R> for LocalRank<R>
where
    R: Clone + Send + Sync + 'static,
{
    type Fabric = LocalFabric<R>;

    fn rank(&self) -> u32 {
        self.rank
    }

    fn rank_count(&self) -> u32 {
        self.cluster.rank_count
    }

    async fn establish(mut self, shard: Arc<Shard<R>>) -> Result<LocalFabric<R>> {
        let rank_count = self.cluster.rank_count;
        if self.rank >= rank_count {
            anyhow::bail!("Rank {} outside of process group of {}", self.rank, rank_count);
        }
        match self.cluster.shards.entry(self.rank) {
            Entry::Occupied(_) => anyhow::bail!("Rank {} joined the cluster twice", self.rank),
            Entry::Vacant(slot) => {
                slot.insert(shard);
            }
        }
        self.published = true;
        self.cluster.changed.notify_waiters();

        tracing::debug!("Rank {} published its shard, waiting for peers", self.rank);
        loop {
            // Registered before the checks so a concurrent notify is not lost.
            let changed = self.cluster.changed.notified();
            if self.cluster.abandoned.load(Ordering::Acquire) {
                anyhow::bail!(
                    "Rank {}: a peer left the cluster before publishing its shard",
                    self.rank
                );
            }
            if self.cluster.shards.len() == rank_count as usize {
                break;
            }
            changed.await;
        }

        let mut shards = Vec::with_capacity(rank_count as usize);
        for rank in 0..rank_count {
            let shard = self
                .cluster
                .shards
                .get(&rank)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| anyhow::anyhow!("Rank {} never published a shard", rank))?;
            shards.push(shard);
        }

        tracing::debug!("Rank {} holds handles for {} shards", self.rank, shards.len());

        Ok(LocalFabric {
            rank: self.rank,
            shards,
        })
    }
}

/// Handle set of one in-process rank.
pub struct LocalFabric<R> {
    rank: u32,
    shards: Vec<Arc<Shard<R>>>,
}

impl<R> LocalFabric<R> {
    fn shard(&self, rank: u32) -> Result<&Shard<R>> {
        self.shards
            .get(rank as usize)
            .map(|shard| shard.as_ref())
            .ok_or_else(|| anyhow::anyhow!("No handle for rank {}", rank))
    }
}

impl<R> Fabric<R> for LocalFabric<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn rank(&self) -> u32 {
        self.rank
    }

    fn rank_count(&self) -> u32 {
        self.shards.len() as u32
    }

    fn shard_len(&self, rank: u32) -> u64 {
        self.shards
            .get(rank as usize)
            .map(|shard| shard.len())
            .unwrap_or(0)
    }

    async fn compare_exchange(&self, addr: SlotAddr, current: u32, new: u32) -> Result<u32> {
        self.shard(addr.rank)?
            .compare_exchange(addr.offset, current, new)
    }

    async fn load(&self, addr: SlotAddr) -> Result<u32> {
        self.shard(addr.rank)?.load(addr.offset)
    }

    async fn read(&self, addr: SlotAddr) -> Result<Option<R>> {
        self.shard(addr.rank)?.read(addr.offset)
    }

    async fn write(&self, addr: SlotAddr, record: R) -> Result<()> {
        self.shard(addr.rank)?.write(addr.offset, record)
    }
}
