use crate::table::types::{SLOT_FREE, SLOT_OCCUPIED};

use anyhow::Result;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Backing storage of one rank: an occupancy word and a write-once record
/// cell per local slot.
///
/// Every remote primitive of the fabric ends up here, either directly (local
/// transport, or the owning rank itself) or through the shard service.
pub struct Shard<R> {
    occupancy: Box<[AtomicU32]>,
    records: Box<[OnceLock<R>]>,
}

impl<R> Shard<R> {
    /// Allocates `len` free slots.
    pub fn new(len: u64) -> Self {
        let len = len as usize;
        Self {
            occupancy: (0..len).map(|_| AtomicU32::new(SLOT_FREE)).collect(),
            records: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> u64 {
        self.occupancy.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    pub fn compare_exchange(&self, offset: u64, current: u32, new: u32) -> Result<u32> {
        let word = self.word(offset)?;
        match word.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(previous) | Err(previous) => Ok(previous),
        }
    }

    pub fn load(&self, offset: u64) -> Result<u32> {
        Ok(self.word(offset)?.load(Ordering::Acquire))
    }

    /// Claims the slot at `offset`. True iff this call moved it from free to
    /// occupied.
    pub fn try_claim(&self, offset: u64) -> Result<bool> {
        Ok(self.compare_exchange(offset, SLOT_FREE, SLOT_OCCUPIED)? == SLOT_FREE)
    }

    pub fn write(&self, offset: u64, record: R) -> Result<()> {
        let cell = self.cell(offset)?;
        if self.word(offset)?.load(Ordering::Acquire) != SLOT_OCCUPIED {
            anyhow::bail!("Write to unclaimed slot at offset {}", offset);
        }
        if cell.set(record).is_err() {
            anyhow::bail!("Slot at offset {} already holds a record", offset);
        }
        Ok(())
    }

    /// Number of claimed slots. Linear in the shard length.
    pub fn occupied(&self) -> u64 {
        self.occupancy
            .iter()
            .filter(|word| word.load(Ordering::Relaxed) == SLOT_OCCUPIED)
            .count() as u64
    }

    fn word(&self, offset: u64) -> Result<&AtomicU32> {
        self.occupancy.get(offset as usize).ok_or_else(|| {
            anyhow::anyhow!(
                "Offset {} outside of shard of {} slots",
                offset,
                self.occupancy.len()
            )
        })
    }

    fn cell(&self, offset: u64) -> Result<&OnceLock<R>> {
        self.records.get(offset as usize).ok_or_else(|| {
            anyhow::anyhow!(
                "Offset {} outside of shard of {} slots",
                offset,
                self.records.len()
            )
        })
    }
}

impl<R: Clone> Shard<R> {
    pub fn read(&self, offset: u64) -> Result<Option<R>> {
        Ok(self.cell(offset)?.get().cloned())
    }
}
