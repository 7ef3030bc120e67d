/// Linear probe sequence over a table of `capacity` slots.
///
/// Yields `start, start + 1, ...` wrapping at the end of the table and stops
/// right before it would come back to `start`, so every slot is visited at
/// most once per operation.
#[derive(Debug, Clone)]
pub struct ProbeSequence {
    start: u64,
    capacity: u64,
    probe: u64,
}

impl ProbeSequence {
    pub fn new(start: u64, capacity: u64) -> Self {
        debug_assert!(start < capacity);
        Self {
            start,
            capacity,
            probe: 0,
        }
    }

    /// Number of slots yielded so far.
    pub fn probes(&self) -> u64 {
        self.probe
    }
}

impl Iterator for ProbeSequence {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.probe >= self.capacity {
            return None;
        }
        let slot = (self.start + self.probe) % self.capacity;
        self.probe += 1;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.capacity - self.probe) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ProbeSequence {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_wraps_around() {
        let slots: Vec<u64> = ProbeSequence::new(6, 8).collect();
        assert_eq!(slots, vec![6, 7, 0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_probe_visits_each_slot_once() {
        let mut seen = vec![false; 13];
        let mut sequence = ProbeSequence::new(9, 13);
        for slot in sequence.by_ref() {
            assert!(!seen[slot as usize], "slot {} visited twice", slot);
            seen[slot as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(sequence.probes(), 13);
    }

    #[test]
    fn test_single_slot_table() {
        let slots: Vec<u64> = ProbeSequence::new(0, 1).collect();
        assert_eq!(slots, vec![0]);
    }
}
