//! K-mer Records Module
//!
//! The concrete records the table stores: k-mers with their backward and
//! forward extensions, as produced by the read-processing stage of the
//! assembler.
//!
//! - **`types`**: packed `Kmer` key and the `KmerPair` record.
//! - **`reader`**: the `KMER BF` text format, split evenly across ranks.

pub mod reader;
pub mod types;
