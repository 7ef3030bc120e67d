//! Rank configuration.
//!
//! Command-line flags of the `kmer-dht` binary, parsed by hand into a
//! [`RankConfig`].

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Fraction of the table the input is allowed to fill when the capacity is
/// derived from the k-mer count.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.5;

/// Offset between the rendezvous port and the shard service port when no
/// `--http` address is given.
pub const HTTP_PORT_OFFSET: u16 = 1000;

/// How the table capacity is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// Exactly this many slots.
    Capacity(u64),
    /// `ceil(kmer_count / load_factor)` slots.
    LoadFactor(f64),
}

impl Sizing {
    pub fn capacity_for(&self, kmer_count: u64) -> u64 {
        match *self {
            Sizing::Capacity(capacity) => capacity,
            Sizing::LoadFactor(factor) => ((kmer_count as f64 / factor).ceil() as u64).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankConfig {
    pub rank: u32,
    pub rank_count: u32,
    /// UDP address of this rank's rendezvous socket.
    pub bind_addr: SocketAddr,
    /// Address the shard service listens on.
    pub http_addr: SocketAddr,
    /// Rendezvous address of rank 0.
    pub coordinator: SocketAddr,
    pub kmers: PathBuf,
    pub sizing: Sizing,
    /// Run every rank as a task of this process instead of one rank per process.
    pub in_process: bool,
}

impl RankConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut bind_addr: Option<SocketAddr> = None;
        let mut http_addr: Option<SocketAddr> = None;
        let mut coordinator: Option<SocketAddr> = None;
        let mut rank: Option<u32> = None;
        let mut rank_count: Option<u32> = None;
        let mut kmers: Option<PathBuf> = None;
        let mut sizing = Sizing::LoadFactor(DEFAULT_LOAD_FACTOR);
        let mut in_process = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--in-process" => {
                    in_process = true;
                    i += 1;
                    continue;
                }
                flag @ ("--bind" | "--http" | "--coordinator" | "--rank" | "--ranks"
                | "--kmers" | "--capacity" | "--load-factor") => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| anyhow::anyhow!("{} needs a value", flag))?;
                    match flag {
                        "--bind" => bind_addr = Some(value.parse()?),
                        "--http" => http_addr = Some(value.parse()?),
                        "--coordinator" => coordinator = Some(value.parse()?),
                        "--rank" => rank = Some(value.parse()?),
                        "--ranks" => rank_count = Some(value.parse()?),
                        "--kmers" => kmers = Some(PathBuf::from(value)),
                        "--capacity" => sizing = Sizing::Capacity(value.parse()?),
                        _ => {
                            let factor: f64 = value.parse()?;
                            if !(factor > 0.0 && factor <= 1.0) {
                                anyhow::bail!("--load-factor must be in (0, 1], got {}", factor);
                            }
                            sizing = Sizing::LoadFactor(factor);
                        }
                    }
                    i += 2;
                }
                other => {
                    tracing::warn!("Ignoring unknown argument {}", other);
                    i += 1;
                }
            }
        }

        let kmers = kmers.ok_or_else(|| anyhow::anyhow!("--kmers is required"))?;
        let rank_count = rank_count.ok_or_else(|| anyhow::anyhow!("--ranks is required"))?;
        if rank_count == 0 {
            anyhow::bail!("--ranks must be at least 1");
        }
        if let Sizing::Capacity(0) = sizing {
            anyhow::bail!("--capacity must be at least 1");
        }

        if in_process {
            let unused: SocketAddr = ([127, 0, 0, 1], 0).into();
            return Ok(Self {
                rank: 0,
                rank_count,
                bind_addr: unused,
                http_addr: unused,
                coordinator: unused,
                kmers,
                sizing,
                in_process,
            });
        }

        let rank = rank.ok_or_else(|| anyhow::anyhow!("--rank is required"))?;
        if rank >= rank_count {
            anyhow::bail!("--rank {} outside of --ranks {}", rank, rank_count);
        }
        let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
        let http_addr = match http_addr {
            Some(addr) => addr,
            None => {
                let port = bind_addr.port().checked_add(HTTP_PORT_OFFSET).ok_or_else(|| {
                    anyhow::anyhow!(
                        "--bind port {} too high to derive --http, pass --http",
                        bind_addr.port()
                    )
                })?;
                SocketAddr::new(bind_addr.ip(), port)
            }
        };
        let coordinator = match coordinator {
            Some(addr) => addr,
            None if rank == 0 => bind_addr,
            None => anyhow::bail!("--coordinator is required for rank {}", rank),
        };

        Ok(Self {
            rank,
            rank_count,
            bind_addr,
            http_addr,
            coordinator,
            kmers,
            sizing,
            in_process,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("kmer-dht")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_http_port_derived_from_bind() {
        let config = RankConfig::from_args(&args(&[
            "--bind", "127.0.0.1:5000", "--rank", "0", "--ranks", "2", "--kmers", "k.txt",
        ]))
        .unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:6000".parse().unwrap());
        assert_eq!(config.coordinator, config.bind_addr);
        assert_eq!(config.sizing, Sizing::LoadFactor(DEFAULT_LOAD_FACTOR));
    }

    #[test]
    fn test_high_bind_port_needs_explicit_http() {
        let result = RankConfig::from_args(&args(&[
            "--bind", "127.0.0.1:65000", "--rank", "0", "--ranks", "1", "--kmers", "k",
        ]));
        assert!(result.unwrap_err().to_string().contains("--http"));

        let config = RankConfig::from_args(&args(&[
            "--bind", "127.0.0.1:65000", "--http", "127.0.0.1:7000", "--rank", "0", "--ranks",
            "1", "--kmers", "k",
        ]))
        .unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:7000".parse().unwrap());
    }

    #[test]
    fn test_non_zero_rank_needs_coordinator() {
        let result = RankConfig::from_args(&args(&[
            "--bind", "127.0.0.1:5001", "--rank", "1", "--ranks", "2", "--kmers", "k.txt",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rank_out_of_range() {
        let result = RankConfig::from_args(&args(&[
            "--bind", "127.0.0.1:5001", "--rank", "2", "--ranks", "2", "--kmers", "k.txt",
        ]));
        assert!(result.unwrap_err().to_string().contains("outside"));
    }

    #[test]
    fn test_in_process_needs_no_addresses() {
        let config = RankConfig::from_args(&args(&[
            "--in-process", "--ranks", "4", "--kmers", "k.txt", "--capacity", "64",
        ]))
        .unwrap();
        assert!(config.in_process);
        assert_eq!(config.sizing.capacity_for(1_000), 64);
    }

    #[test]
    fn test_load_factor_sizing() {
        assert_eq!(Sizing::LoadFactor(0.5).capacity_for(10), 20);
        assert_eq!(Sizing::LoadFactor(0.75).capacity_for(10), 14);
        assert_eq!(Sizing::LoadFactor(0.5).capacity_for(0), 1);
        assert!(
            RankConfig::from_args(&args(&["--ranks", "1", "--kmers", "k", "--load-factor", "0"]))
                .is_err()
        );
    }
}
