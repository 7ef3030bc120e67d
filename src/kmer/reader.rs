use super::types::KmerPair;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Non-blank lines of the file, each with its 1-based line number.
fn lines(path: &Path) -> Result<impl Iterator<Item = (usize, std::io::Result<String>)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::new(file)
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty())))
}

/// Number of k-mer lines in the file.
pub fn kmer_count(path: &Path) -> Result<u64> {
    let mut count = 0u64;
    for (_, line) in lines(path)? {
        line.with_context(|| format!("Failed to read {}", path.display()))?;
        count += 1;
    }
    Ok(count)
}

/// Length of the k-mers in the file, taken from its first line.
pub fn kmer_len(path: &Path) -> Result<usize> {
    let first = lines(path)?
        .next()
        .ok_or_else(|| anyhow::anyhow!("{} contains no k-mers", path.display()))?
        .1
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let pair: KmerPair = first.parse()?;
    Ok(pair.kmer.len())
}

/// Lines of the file `rank` is responsible for: contiguous runs of
/// `ceil(total / rank_count)`, the last rank taking what is left.
pub fn share_of(total: u64, rank: u32, rank_count: u32) -> std::ops::Range<u64> {
    let per_rank = total.div_ceil(rank_count.max(1) as u64);
    let start = (rank as u64 * per_rank).min(total);
    let end = (start + per_rank).min(total);
    start..end
}

/// Reads the k-mers of `rank`'s share of the file.
pub fn read_kmers(path: &Path, rank: u32, rank_count: u32) -> Result<Vec<KmerPair>> {
    let total = kmer_count(path)?;
    let share = share_of(total, rank, rank_count);

    let mut kmers = Vec::with_capacity((share.end - share.start) as usize);
    for (line_number, line) in lines(path)?
        .skip(share.start as usize)
        .take((share.end - share.start) as usize)
    {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let pair = line
            .parse::<KmerPair>()
            .with_context(|| format!("{}:{}: bad k-mer record", path.display(), line_number))?;
        kmers.push(pair);
    }

    tracing::debug!(
        "Rank {} read k-mers {}..{} of {} from {}",
        rank,
        share.start,
        share.end,
        total,
        path.display()
    );

    Ok(kmers)
}
