use super::partitioner::PartitionMap;
use super::types::{SLOT_FREE, SLOT_OCCUPIED};
use crate::fabric::Fabric;

use anyhow::Result;
use std::marker::PhantomData;

/// Cluster-wide slot claiming on top of the fabric's atomic primitives.
///
/// `try_claim` is the only mutation of an occupancy word anywhere in the
/// table. Exactly one caller per slot ever sees `true`.
pub struct SlotReservation<'a, R, F> {
    fabric: &'a F,
    partitioner: &'a PartitionMap,
    _record: PhantomData<fn() -> R>,
}

impl<'a, R, F> SlotReservation<'a, R, F>
where
    F: Fabric<R>,
{
    pub fn new(fabric: &'a F, partitioner: &'a PartitionMap) -> Self {
        Self {
            fabric,
            partitioner,
            _record: PhantomData,
        }
    }

    /// Atomically moves `slot` from free to occupied. False if the slot was
    /// already taken, by anyone, including a concurrent claim that won.
    pub async fn try_claim(&self, slot: u64) -> Result<bool> {
        let addr = self.partitioner.locate(slot);
        let previous = self
            .fabric
            .compare_exchange(addr, SLOT_FREE, SLOT_OCCUPIED)
            .await?;
        Ok(previous == SLOT_FREE)
    }

    /// Plain atomic load of the occupancy word. Never mutates.
    pub async fn is_occupied(&self, slot: u64) -> Result<bool> {
        let addr = self.partitioner.locate(slot);
        Ok(self.fabric.load(addr).await? != SLOT_FREE)
    }
}
