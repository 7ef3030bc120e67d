use crate::table::types::{TableKey, TableRecord};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest k-mer that fits the packed representation.
pub const MAX_KMER_LEN: usize = 32;

/// Marks the end of a contig in an extension position.
pub const END_EXT: char = 'F';

const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

/// A DNA substring of up to 32 bases, packed two bits per base.
///
/// The first base sits in the most significant used bits, so two k-mers of
/// the same length compare like their strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kmer {
    len: u8,
    bits: u64,
}

impl Kmer {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn base_at(&self, i: usize) -> char {
        let shift = 2 * (self.len() - 1 - i);
        BASES[((self.bits >> shift) & 0b11) as usize]
    }
}

fn base_code(base: char) -> Option<u64> {
    match base {
        'A' => Some(0),
        'C' => Some(1),
        'G' => Some(2),
        'T' => Some(3),
        _ => None,
    }
}

impl FromStr for Kmer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            anyhow::bail!("Empty k-mer");
        }
        if s.len() > MAX_KMER_LEN {
            anyhow::bail!("K-mer of {} bases exceeds the maximum of {}", s.len(), MAX_KMER_LEN);
        }

        let mut bits = 0u64;
        for base in s.chars() {
            let code = base_code(base)
                .ok_or_else(|| anyhow::anyhow!("Invalid base {:?} in k-mer {}", base, s))?;
            bits = (bits << 2) | code;
        }

        Ok(Self {
            len: s.len() as u8,
            bits,
        })
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len() {
            write!(f, "{}", self.base_at(i))?;
        }
        Ok(())
    }
}

impl TableKey for Kmer {
    /// splitmix64 finalizer over the packed bases and the length. Fixed
    /// across builds and platforms, so ranks compiled separately agree on
    /// every slot.
    fn slot_hash(&self) -> u64 {
        let mut z = self
            .bits
            .wrapping_add((self.len as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// A k-mer with the bases that precede and follow it in the reads.
///
/// Either extension may be [`END_EXT`] when the k-mer starts or ends a
/// contig.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KmerPair {
    pub kmer: Kmer,
    pub backward_ext: char,
    pub forward_ext: char,
}

impl KmerPair {
    pub fn new(kmer: Kmer, backward_ext: char, forward_ext: char) -> Result<Self> {
        for ext in [backward_ext, forward_ext] {
            if ext != END_EXT && base_code(ext).is_none() {
                anyhow::bail!("Invalid extension {:?} for k-mer {}", ext, kmer);
            }
        }
        Ok(Self {
            kmer,
            backward_ext,
            forward_ext,
        })
    }

    pub fn starts_contig(&self) -> bool {
        self.backward_ext == END_EXT
    }

    pub fn ends_contig(&self) -> bool {
        self.forward_ext == END_EXT
    }
}

/// Parses one line of a k-mer file: `KMER BF`, where `B` and `F` are the
/// backward and forward extensions.
impl FromStr for KmerPair {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let kmer: Kmer = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("Missing k-mer"))?
            .parse()?;
        let exts = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("Missing extensions for k-mer {}", kmer))?;
        if fields.next().is_some() {
            anyhow::bail!("Trailing fields after k-mer {}", kmer);
        }

        let mut chars = exts.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(backward), Some(forward), None) => KmerPair::new(kmer, backward, forward),
            _ => anyhow::bail!("Extensions {:?} of k-mer {} are not two characters", exts, kmer),
        }
    }
}

impl fmt::Display for KmerPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.kmer, self.backward_ext, self.forward_ext)
    }
}

impl TableRecord for KmerPair {
    type Key = Kmer;

    fn key(&self) -> &Kmer {
        &self.kmer
    }
}
