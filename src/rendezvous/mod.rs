//! Handle Rendezvous Module
//!
//! One-time collective step in which every rank of a networked table learns
//! the shard handle of every other rank.
//!
//! ## Core Mechanisms
//! - **Coordinator**: rank 0 collects one `Announce` per rank and answers with
//!   the complete handle table once all ranks are in.
//! - **Announce loop**: every other rank resends its handle on a fixed interval
//!   until the table arrives, so lost datagrams only cost time.
//! - **Late responder**: the coordinator keeps answering repeated announces for
//!   the lifetime of the table, so a rank whose copy of the table was dropped
//!   still completes.

pub mod service;
pub mod types;
