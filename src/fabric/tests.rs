//! Fabric Module Tests
//!
//! ## Test Scopes
//! - **Shard**: occupancy words, write-once cells and their error cases.
//! - **Local transport**: the in-process handle exchange.
//! - **Network transport**: a full table over loopback HTTP, with the
//!   rendezvous run on fixed UDP ports.

#[cfg(test)]
mod tests {
    use crate::config::{RankConfig, Sizing};
    use crate::fabric::Fabric;
    use crate::fabric::local::LocalCluster;
    use crate::fabric::remote::{NetworkRank, RemoteFabric};
    use crate::fabric::shard::Shard;
    use crate::fabric::ProcessGroup;
    use crate::table::map::DistributedHashMap;
    use crate::table::types::{SLOT_FREE, SLOT_OCCUPIED, SlotAddr, TableKey, TableRecord};
    use serde::{Deserialize, Serialize};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct TestKey {
        id: u32,
        hash: u64,
    }

    impl TableKey for TestKey {
        fn slot_hash(&self) -> u64 {
            self.hash
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestRecord {
        key: TestKey,
        payload: Vec<u8>,
    }

    impl TableRecord for TestRecord {
        type Key = TestKey;

        fn key(&self) -> &TestKey {
            &self.key
        }
    }

    fn record(id: u32, hash: u64) -> TestRecord {
        TestRecord {
            key: TestKey { id, hash },
            payload: vec![id as u8; 4],
        }
    }

    type RemoteTable = DistributedHashMap<TestRecord, RemoteFabric<TestRecord>>;

    /// Rank 0 runs the rendezvous on `coordinator_port`; everything else
    /// binds an ephemeral port.
    fn network_config(rank: u32, rank_count: u32, coordinator_port: u16) -> RankConfig {
        let coordinator: SocketAddr = ([127, 0, 0, 1], coordinator_port).into();
        let ephemeral: SocketAddr = ([127, 0, 0, 1], 0).into();
        RankConfig {
            rank,
            rank_count,
            bind_addr: if rank == 0 { coordinator } else { ephemeral },
            http_addr: ephemeral,
            coordinator,
            kmers: PathBuf::new(),
            sizing: Sizing::Capacity(8),
            in_process: false,
        }
    }

    async fn network_tables(capacity: u64, coordinator_port: u16) -> (RemoteTable, RemoteTable) {
        let (first, second) = tokio::join!(
            DistributedHashMap::new(capacity, NetworkRank::new(network_config(0, 2, coordinator_port))),
            DistributedHashMap::new(capacity, NetworkRank::new(network_config(1, 2, coordinator_port)))
        );
        (first.unwrap(), second.unwrap())
    }

    // ============================================================
    // SHARD TESTS
    // ============================================================

    #[test]
    fn test_new_shard_is_free() {
        let shard: Shard<TestRecord> = Shard::new(4);

        assert_eq!(shard.len(), 4);
        assert!(!shard.is_empty());
        assert_eq!(shard.occupied(), 0);
        for offset in 0..4 {
            assert_eq!(shard.load(offset).unwrap(), SLOT_FREE);
            assert_eq!(shard.read(offset).unwrap(), None);
        }
    }

    #[test]
    fn test_claim_is_terminal() {
        let shard: Shard<TestRecord> = Shard::new(2);

        assert!(shard.try_claim(1).unwrap());
        assert!(!shard.try_claim(1).unwrap(), "second claim must lose");
        assert_eq!(shard.load(1).unwrap(), SLOT_OCCUPIED);
        assert_eq!(
            shard.compare_exchange(1, SLOT_FREE, SLOT_OCCUPIED).unwrap(),
            SLOT_OCCUPIED,
            "a failed exchange reports the word it saw"
        );
        assert_eq!(shard.occupied(), 1);
    }

    #[test]
    fn test_write_requires_claim() {
        let shard = Shard::new(2);

        assert!(shard.write(0, record(1, 0)).is_err());
        assert_eq!(shard.read(0).unwrap(), None);
    }

    #[test]
    fn test_record_is_write_once() {
        let shard = Shard::new(2);
        shard.try_claim(0).unwrap();

        shard.write(0, record(1, 0)).unwrap();
        let second = shard.write(0, record(2, 0));

        assert!(second.is_err());
        assert_eq!(shard.read(0).unwrap(), Some(record(1, 0)));
    }

    #[test]
    fn test_out_of_range_offsets() {
        let shard: Shard<TestRecord> = Shard::new(3);

        assert!(shard.load(3).is_err());
        assert!(shard.read(3).is_err());
        assert!(shard.compare_exchange(3, SLOT_FREE, SLOT_OCCUPIED).is_err());
        assert!(shard.write(3, record(1, 0)).is_err());
    }

    #[test]
    fn test_empty_shard() {
        let shard: Shard<TestRecord> = Shard::new(0);

        assert!(shard.is_empty());
        assert!(shard.load(0).is_err());
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        // ARRANGE
        let shard: Arc<Shard<TestRecord>> = Arc::new(Shard::new(1));
        let winners = Arc::new(AtomicUsize::new(0));

        // ACT: many threads race for the same slot
        std::thread::scope(|scope| {
            for _ in 0..16 {
                let shard = shard.clone();
                let winners = winners.clone();
                scope.spawn(move || {
                    if shard.try_claim(0).unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        // ASSERT
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    // ============================================================
    // LOCAL TRANSPORT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_local_fabric_reaches_every_shard() {
        let cluster = LocalCluster::<TestRecord>::new(2);
        let (first, second) = tokio::join!(
            cluster.rank(0).establish(Arc::new(Shard::new(3))),
            cluster.rank(1).establish(Arc::new(Shard::new(2)))
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.rank_count(), 2);
        assert_eq!(first.shard_len(0), 3);
        assert_eq!(first.shard_len(1), 2);

        // A claim through one handle is visible through the other
        let addr = SlotAddr { rank: 1, offset: 1 };
        assert_eq!(first.compare_exchange(addr, SLOT_FREE, SLOT_OCCUPIED).await.unwrap(), SLOT_FREE);
        first.write(addr, record(9, 0)).await.unwrap();
        assert_eq!(second.load(addr).await.unwrap(), SLOT_OCCUPIED);
        assert_eq!(second.read(addr).await.unwrap(), Some(record(9, 0)));

        assert!(second.load(SlotAddr { rank: 2, offset: 0 }).await.is_err());
    }

    #[tokio::test]
    async fn test_local_rank_joins_once() {
        let cluster = LocalCluster::<TestRecord>::new(1);

        let first = cluster.rank(0).establish(Arc::new(Shard::new(1))).await;
        let second = cluster.rank(0).establish(Arc::new(Shard::new(1))).await;

        assert!(first.is_ok());
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_dropped_rank_releases_waiting_peers() {
        // ARRANGE
        let cluster = LocalCluster::<TestRecord>::new(2);
        let waiting = cluster.rank(0).establish(Arc::new(Shard::new(1)));
        let leaving = cluster.rank(1);

        // ACT: rank 1 goes away without ever publishing a shard
        let joined = tokio::time::timeout(Duration::from_secs(5), async move {
            let (result, ()) = tokio::join!(waiting, async move { drop(leaving) });
            result
        })
        .await;

        // ASSERT
        let result = joined.expect("rank 0 must not wait forever");
        assert!(result.is_err());
    }

    // ============================================================
    // NETWORK TRANSPORT TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_network_table_insert_and_find() {
        // ARRANGE: 8 slots over 2 ranks, slots 4..8 live on rank 1
        let (first, second) = network_tables(8, 47311).await;
        assert_eq!(first.local_size(), 4);
        assert_eq!(first.fabric().handles().len(), 2);

        // ACT
        assert!(first.insert(record(1, 5)).await.unwrap(), "remote claim and write");
        assert!(second.insert(record(2, 5)).await.unwrap(), "collides, lands locally");

        // ASSERT
        assert_eq!(first.slot_of(&record(1, 5).key).await.unwrap(), Some(5));
        assert_eq!(first.slot_of(&record(2, 5).key).await.unwrap(), Some(6));
        assert_eq!(
            second.find(&record(1, 5).key).await.unwrap(),
            Some(record(1, 5))
        );
        assert_eq!(first.find(&TestKey { id: 3, hash: 7 }).await.unwrap(), None);

        let info = first.fabric().shard_info(1).await.unwrap();
        assert_eq!(info.rank, 1);
        assert_eq!(info.len, 4);
        assert_eq!(info.occupied, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_network_primitives_enforce_ownership() {
        let (first, _second) = network_tables(8, 47312).await;
        let fabric = first.fabric();
        let addr = SlotAddr { rank: 1, offset: 2 };

        // Unclaimed slots reject writes
        assert!(fabric.write(addr, record(1, 0)).await.is_err());

        assert_eq!(fabric.compare_exchange(addr, SLOT_FREE, SLOT_OCCUPIED).await.unwrap(), SLOT_FREE);
        assert_eq!(fabric.compare_exchange(addr, SLOT_FREE, SLOT_OCCUPIED).await.unwrap(), SLOT_OCCUPIED);
        assert_eq!(fabric.load(addr).await.unwrap(), SLOT_OCCUPIED);
        assert_eq!(fabric.read(addr).await.unwrap(), None, "claimed but not written");

        fabric.write(addr, record(1, 0)).await.unwrap();
        assert_eq!(fabric.read(addr).await.unwrap(), Some(record(1, 0)));

        // Second write to the same slot is refused by the owner
        assert!(fabric.write(addr, record(2, 0)).await.is_err());

        // Offsets past the remote shard are rejected
        assert!(fabric.load(SlotAddr { rank: 1, offset: 4 }).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_network_table_fills_up() {
        let (first, second) = network_tables(4, 47313).await;

        for id in 0..4 {
            let table = if id % 2 == 0 { &first } else { &second };
            assert!(table.insert(record(id, 0)).await.unwrap());
        }

        assert!(!first.insert(record(4, 0)).await.unwrap());
        assert!(!second.insert(record(5, 3)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_network_capacity_mismatch_is_rejected() {
        let (first, second): (anyhow::Result<RemoteTable>, anyhow::Result<RemoteTable>) = tokio::join!(
            DistributedHashMap::new(8, NetworkRank::new(network_config(0, 2, 47314))),
            DistributedHashMap::new(10, NetworkRank::new(network_config(1, 2, 47314)))
        );

        assert!(first.is_err());
        assert!(second.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_network_concurrent_inserts_claim_distinct_slots() {
        // ARRANGE: 256 slots over 2 ranks, so collision chains span both shards
        let (first, second) = network_tables(256, 47315).await;
        let tables = [Arc::new(first), Arc::new(second)];
        let per_rank = 100u32;

        // ACT: both ranks insert colliding keys at the same time
        let mut joins = Vec::new();
        for (rank, table) in tables.iter().enumerate() {
            let table = table.clone();
            joins.push(tokio::spawn(async move {
                for i in 0..per_rank {
                    let id = rank as u32 * per_rank + i;
                    assert!(table.insert(record(id, (id % 7) as u64)).await.unwrap());
                }
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        // ASSERT: every key is found from both ranks, each in its own slot
        for table in &tables {
            let mut slots = HashSet::new();
            for id in 0..2 * per_rank {
                let key = TestKey {
                    id,
                    hash: (id % 7) as u64,
                };
                let slot = table.slot_of(&key).await.unwrap();
                assert!(slot.is_some(), "key {} missing", id);
                assert!(slots.insert(slot), "slot {:?} holds two keys", slot);
            }
        }
    }
}
