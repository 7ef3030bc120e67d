use anyhow::Result;
use kmer_dht::config::RankConfig;
use kmer_dht::fabric::Fabric;
use kmer_dht::fabric::local::LocalCluster;
use kmer_dht::fabric::remote::NetworkRank;
use kmer_dht::kmer::reader::{kmer_count, kmer_len, read_kmers};
use kmer_dht::kmer::types::KmerPair;
use kmer_dht::table::map::DistributedHashMap;
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let config = match RankConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let total = kmer_count(&config.kmers)?;
    let capacity = config.sizing.capacity_for(total);
    tracing::info!(
        "{} k-mers of length {} in {}, table capacity {} over {} ranks",
        total,
        kmer_len(&config.kmers)?,
        config.kmers.display(),
        capacity,
        config.rank_count
    );

    if config.in_process {
        run_in_process(config, capacity).await
    } else {
        run_rank(config, capacity).await
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} --kmers <path> --ranks <n> (--in-process | --rank <r> --bind <addr:port> [--coordinator <addr:port>] [--http <addr:port>]) [--capacity <slots> | --load-factor <f>]",
        program
    );
    eprintln!(
        "Example: {} --kmers test.txt --ranks 2 --rank 0 --bind 127.0.0.1:5000",
        program
    );
    eprintln!(
        "Example: {} --kmers test.txt --ranks 2 --rank 1 --bind 127.0.0.1:5001 --coordinator 127.0.0.1:5000",
        program
    );
    eprintln!("Example: {} --kmers test.txt --ranks 4 --in-process", program);
}

/// One rank per process: serve the local shard until Ctrl+C so peers can keep
/// reading it after this rank is done.
async fn run_rank(config: RankConfig, capacity: u64) -> Result<()> {
    let table = DistributedHashMap::new(capacity, NetworkRank::new(config.clone())).await?;

    build_and_verify(&table, &config).await?;

    match table.fabric().shard_info(table.rank()).await {
        Ok(info) => tracing::info!(
            "Rank {} shard holds {}/{} occupied slots",
            info.rank,
            info.occupied,
            info.len
        ),
        Err(e) => tracing::warn!("Failed to fetch shard info: {}", e),
    }

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    Ok(())
}

async fn run_in_process(config: RankConfig, capacity: u64) -> Result<()> {
    let cluster = LocalCluster::<KmerPair>::new(config.rank_count);
    let config = Arc::new(config);

    let mut workers = Vec::with_capacity(config.rank_count as usize);
    for rank in 0..config.rank_count {
        let group = cluster.rank(rank);
        let config = config.clone();
        workers.push(tokio::spawn(async move {
            let table = DistributedHashMap::new(capacity, group).await?;
            build_and_verify(&table, &config).await
        }));
    }

    for worker in workers {
        worker.await??;
    }

    tracing::info!("All {} ranks finished", config.rank_count);
    Ok(())
}

/// Inserts this rank's share of the input, then looks every one of those
/// k-mers up again.
async fn build_and_verify<F>(table: &DistributedHashMap<KmerPair, F>, config: &RankConfig) -> Result<()>
where
    F: Fabric<KmerPair>,
{
    let kmers = read_kmers(&config.kmers, table.rank(), table.rank_count())?;

    let start = Instant::now();
    for pair in &kmers {
        if !table.insert(*pair).await? {
            anyhow::bail!(
                "Table of {} slots is full; rerun with a larger --capacity or a lower --load-factor",
                table.capacity()
            );
        }
    }
    tracing::info!(
        "Rank {} inserted {} k-mers in {:?}",
        table.rank(),
        kmers.len(),
        start.elapsed()
    );

    let start = Instant::now();
    let mut missing = 0usize;
    let mut mismatched = 0usize;
    for pair in &kmers {
        match table.find(&pair.kmer).await? {
            Some(found) if found == *pair => {}
            Some(found) => {
                tracing::warn!("Lookup of {} returned {}", pair, found);
                mismatched += 1;
            }
            None => {
                tracing::error!("K-mer {} missing after insert", pair.kmer);
                missing += 1;
            }
        }
    }

    let stats = table.stats();
    tracing::info!(
        "Rank {} verified {} k-mers in {:?} ({} mismatched, mean probe length {:.2})",
        table.rank(),
        kmers.len(),
        start.elapsed(),
        mismatched,
        stats.mean_probe_length()
    );

    if missing > 0 {
        anyhow::bail!("{} k-mers could not be found after insertion", missing);
    }
    Ok(())
}
