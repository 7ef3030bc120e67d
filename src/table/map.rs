use super::partitioner::PartitionMap;
use super::probe::ProbeSequence;
use super::reservation::SlotReservation;
use super::types::{ProbeStats, TableKey, TableRecord};
use crate::fabric::shard::Shard;
use crate::fabric::{Fabric, ProcessGroup};

use anyhow::Result;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One rank's handle on the distributed table.
///
/// Every rank of the process group constructs its own `DistributedHashMap`
/// with the same capacity. Inserts and lookups may then be issued from any
/// rank and address any slot; the fabric routes each primitive to the rank
/// owning the slot.
pub struct DistributedHashMap<R, F> {
    partitioner: PartitionMap,
    fabric: F,
    counters: ProbeCounters,
    _record: PhantomData<fn() -> R>,
}

#[derive(Default)]
struct ProbeCounters {
    inserts: AtomicU64,
    failed_inserts: AtomicU64,
    finds: AtomicU64,
    find_misses: AtomicU64,
    probes: AtomicU64,
}

impl ProbeCounters {
    fn snapshot(&self) -> ProbeStats {
        ProbeStats {
            inserts: self.inserts.load(Ordering::Relaxed),
            failed_inserts: self.failed_inserts.load(Ordering::Relaxed),
            finds: self.finds.load(Ordering::Relaxed),
            find_misses: self.find_misses.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
        }
    }
}

impl<R, F> DistributedHashMap<R, F>
where
    R: TableRecord,
    F: Fabric<R>,
{
    /// Allocates this rank's shard and runs the handle exchange.
    ///
    /// Collective: every rank of `group` must call it with the same
    /// `capacity`. Resolves once this rank can address every shard.
    pub async fn new<G>(capacity: u64, group: G) -> Result<Self>
    where
        G: ProcessGroup<R, Fabric = F>,
    {
        let rank = group.rank();
        let partitioner = PartitionMap::new(capacity, group.rank_count())?;
        if rank >= partitioner.rank_count() {
            anyhow::bail!(
                "Rank {} outside of process group of {}",
                rank,
                partitioner.rank_count()
            );
        }

        let shard = Arc::new(Shard::new(partitioner.shard_len(rank)));
        tracing::info!(
            "Rank {} allocated shard of {} slots (table of {} over {} ranks)",
            rank,
            shard.len(),
            capacity,
            partitioner.rank_count()
        );

        let fabric = group.establish(shard).await?;
        Self::with_fabric(partitioner, fabric)
    }

    fn with_fabric(partitioner: PartitionMap, fabric: F) -> Result<Self> {
        if fabric.rank_count() != partitioner.rank_count() {
            anyhow::bail!(
                "Fabric reaches {} ranks, table expects {}",
                fabric.rank_count(),
                partitioner.rank_count()
            );
        }
        for rank in 0..partitioner.rank_count() {
            let announced = fabric.shard_len(rank);
            let expected = partitioner.shard_len(rank);
            if announced != expected {
                anyhow::bail!(
                    "Rank {} holds {} slots but a table of {} slots needs {} there; \
                     ranks were constructed with different capacities",
                    rank,
                    announced,
                    partitioner.capacity(),
                    expected
                );
            }
        }

        Ok(Self {
            partitioner,
            fabric,
            counters: ProbeCounters::default(),
            _record: PhantomData,
        })
    }

    /// Total number of slots across all ranks.
    pub fn capacity(&self) -> u64 {
        self.partitioner.capacity()
    }

    pub fn rank(&self) -> u32 {
        self.fabric.rank()
    }

    pub fn rank_count(&self) -> u32 {
        self.partitioner.rank_count()
    }

    /// Number of slots stored on this rank.
    pub fn local_size(&self) -> u64 {
        self.partitioner.shard_len(self.fabric.rank())
    }

    pub fn partitioner(&self) -> &PartitionMap {
        &self.partitioner
    }

    pub fn fabric(&self) -> &F {
        &self.fabric
    }

    pub fn stats(&self) -> ProbeStats {
        self.counters.snapshot()
    }

    fn reservation(&self) -> SlotReservation<'_, R, F> {
        SlotReservation::new(&self.fabric, &self.partitioner)
    }

    /// Stores `record` in the first slot of its probe sequence this rank
    /// manages to claim.
    ///
    /// Returns `Ok(false)` when every slot of the table is taken. Errors are
    /// transport failures or ownership violations reported by the fabric.
    pub async fn insert(&self, record: R) -> Result<bool> {
        let start = self.partitioner.start_slot(record.key().slot_hash());
        let reservation = self.reservation();
        let mut probes = ProbeSequence::new(start, self.capacity());

        while let Some(slot) = probes.next() {
            if reservation.try_claim(slot).await? {
                self.fabric
                    .write(self.partitioner.locate(slot), record)
                    .await?;
                self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .probes
                    .fetch_add(probes.probes(), Ordering::Relaxed);
                tracing::trace!(
                    "Inserted into slot {} after {} probes",
                    slot,
                    probes.probes()
                );
                return Ok(true);
            }
        }

        self.counters.failed_inserts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .probes
            .fetch_add(probes.probes(), Ordering::Relaxed);
        tracing::warn!(
            "Insert failed on rank {}: all {} slots are occupied",
            self.rank(),
            self.capacity()
        );
        Ok(false)
    }

    /// Looks `key` up. `Ok(None)` when it is absent.
    pub async fn find(&self, key: &R::Key) -> Result<Option<R>> {
        Ok(self.probe_for(key).await?.map(|(_, record)| record))
    }

    /// Global slot currently holding `key`, if any.
    pub async fn slot_of(&self, key: &R::Key) -> Result<Option<u64>> {
        Ok(self.probe_for(key).await?.map(|(slot, _)| slot))
    }

    /// Reads the record stored at a global slot without probing.
    pub async fn read_slot(&self, slot: u64) -> Result<Option<R>> {
        if !self.reservation().is_occupied(slot).await? {
            return Ok(None);
        }
        self.fabric.read(self.partitioner.locate(slot)).await
    }

    async fn probe_for(&self, key: &R::Key) -> Result<Option<(u64, R)>> {
        let start = self.partitioner.start_slot(key.slot_hash());
        let reservation = self.reservation();
        let mut probes = ProbeSequence::new(start, self.capacity());
        self.counters.finds.fetch_add(1, Ordering::Relaxed);

        while let Some(slot) = probes.next() {
            // Slots never return to free, so an insert of `key` could not
            // have skipped this one.
            if !reservation.is_occupied(slot).await? {
                tracing::trace!("Miss at free slot {} after {} probes", slot, probes.probes());
                break;
            }

            match self.fabric.read(self.partitioner.locate(slot)).await? {
                Some(record) if record.key() == key => {
                    self.counters
                        .probes
                        .fetch_add(probes.probes(), Ordering::Relaxed);
                    return Ok(Some((slot, record)));
                }
                Some(_) => {}
                None => {
                    tracing::trace!("Slot {} claimed but not written yet", slot);
                }
            }
        }

        self.counters.find_misses.fetch_add(1, Ordering::Relaxed);
        self.counters
            .probes
            .fetch_add(probes.probes(), Ordering::Relaxed);
        Ok(None)
    }
}
