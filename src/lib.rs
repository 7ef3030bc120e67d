//! Distributed K-mer Hash Table Library
//!
//! A fixed-capacity hash table whose slots are spread over a group of
//! cooperating processes ("ranks"). Every rank owns one contiguous shard and
//! every rank can read, write and atomically claim slots in any shard.
//!
//! ## Architecture Modules
//! - **`table`**: the table itself. Partitioning of slots across ranks, the
//!   compare-and-swap slot reservation and the linear probe sequence behind
//!   `insert` and `find`.
//! - **`fabric`**: remote memory access. The `Fabric` trait with its in-process
//!   and HTTP transports, plus the shard storage both sit on.
//! - **`rendezvous`**: the one-time UDP handle exchange that lets networked
//!   ranks find each other's shards.
//! - **`kmer`**: the k-mer records stored by the assembler and their file format.
//! - **`config`**: command-line configuration of a rank.

pub mod config;
pub mod fabric;
pub mod kmer;
pub mod rendezvous;
pub mod table;
