//! Networked transport.
//!
//! Each rank serves its shard over HTTP and reaches every other shard as a
//! client. Operations addressed to the local rank go straight to the shard.

use super::handlers::{ShardService, shard_router};
use super::protocol::*;
use super::shard::Shard;
use super::{Fabric, ProcessGroup};
use crate::config::RankConfig;
use crate::rendezvous::service::RendezvousService;
use crate::rendezvous::types::ShardHandle;
use crate::table::types::SlotAddr;

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const REQUEST_ATTEMPTS: usize = 3;

/// Process-group handle of one networked rank.
pub struct NetworkRank<R> {
    config: RankConfig,
    _record: PhantomData<fn() -> R>,
}

impl<R> NetworkRank<R> {
    pub fn new(config: RankConfig) -> Self {
        Self {
            config,
            _record: PhantomData,
        }
    }
}

impl<R> ProcessGroup<R> for NetworkRank<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Fabric = RemoteFabric<R>;

    fn rank(&self) -> u32 {
        self.config.rank
    }

    fn rank_count(&self) -> u32 {
        self.config.rank_count
    }

    async fn establish(self, shard: Arc<Shard<R>>) -> Result<RemoteFabric<R>> {
        let rank = self.config.rank;

        let listener = tokio::net::TcpListener::bind(self.config.http_addr).await?;
        let http_addr = advertised_addr(listener.local_addr()?, self.config.bind_addr);
        let app = shard_router(Arc::new(ShardService {
            rank,
            shard: shard.clone(),
        }));
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Shard service stopped: {}", e);
            }
        });
        tracing::info!(
            "Rank {} serving shard of {} slots on {}",
            rank,
            shard.len(),
            http_addr
        );

        let local_handle = ShardHandle {
            rank,
            http_addr,
            len: shard.len(),
        };
        let exchanged = match RendezvousService::new(
            self.config.bind_addr,
            self.config.coordinator,
            local_handle,
            self.config.rank_count,
        )
        .await
        {
            Ok(rendezvous) => rendezvous.exchange().await,
            Err(e) => Err(e),
        };
        let (handles, responder) = match exchanged {
            Ok(exchanged) => exchanged,
            Err(e) => {
                server.abort();
                return Err(e);
            }
        };

        let mut tasks = vec![server];
        tasks.extend(responder);

        Ok(RemoteFabric {
            rank,
            handles,
            local: shard,
            http_client: reqwest::Client::new(),
            tasks,
        })
    }
}

/// A wildcard listen address is not reachable by peers; fall back to the
/// rendezvous address's IP in that case.
fn advertised_addr(listening: SocketAddr, bind_addr: SocketAddr) -> SocketAddr {
    if listening.ip().is_unspecified() && !bind_addr.ip().is_unspecified() {
        SocketAddr::new(bind_addr.ip(), listening.port())
    } else {
        listening
    }
}

/// Handle set of one networked rank.
///
/// Owns the shard service and (on rank 0) the rendezvous responder; both are
/// stopped when the fabric is dropped.
pub struct RemoteFabric<R> {
    rank: u32,
    handles: Vec<ShardHandle>,
    local: Arc<Shard<R>>,
    http_client: reqwest::Client,
    tasks: Vec<JoinHandle<()>>,
}

impl<R> RemoteFabric<R> {
    pub fn handles(&self) -> &[ShardHandle] {
        &self.handles
    }

    fn handle(&self, rank: u32) -> Result<&ShardHandle> {
        self.handles
            .get(rank as usize)
            .ok_or_else(|| anyhow::anyhow!("No handle for rank {}", rank))
    }

    fn url(&self, rank: u32, path: &str) -> Result<String> {
        Ok(format!("http://{}{}", self.handle(rank)?.http_addr, path))
    }

    /// Fetches the shard statistics served by `rank`.
    pub async fn shard_info(&self, rank: u32) -> Result<ShardInfoResponse> {
        let url = self.url(rank, ENDPOINT_SHARD_INFO)?;
        let response = self.get_with_retry(url, REQUEST_TIMEOUT, REQUEST_ATTEMPTS).await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Shard info failed {}", response.status()));
        }
        Ok(response.json().await?)
    }

    async fn get_with_retry(
        &self,
        url: String,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 20u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 10;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    async fn remote_word(&self, response: reqwest::Response, op: &str) -> Result<u32> {
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("{} failed {}", op, response.status()));
        }
        let word: Option<WordResponse> = response.json().await?;
        word.map(|w| w.value)
            .ok_or_else(|| anyhow::anyhow!("{} returned no value", op))
    }
}

impl<R> Drop for RemoteFabric<R> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl<R> Fabric<R> for RemoteFabric<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn rank(&self) -> u32 {
        self.rank
    }

    fn rank_count(&self) -> u32 {
        self.handles.len() as u32
    }

    fn shard_len(&self, rank: u32) -> u64 {
        self.handles
            .get(rank as usize)
            .map(|handle| handle.len)
            .unwrap_or(0)
    }

    async fn compare_exchange(&self, addr: SlotAddr, current: u32, new: u32) -> Result<u32> {
        if addr.rank == self.rank {
            return self.local.compare_exchange(addr.offset, current, new);
        }

        let payload = CompareExchangeRequest {
            offset: addr.offset,
            current,
            new,
        };
        // Single attempt: a CAS is not idempotent.
        let response = self
            .http_client
            .post(self.url(addr.rank, ENDPOINT_COMPARE_EXCHANGE)?)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        self.remote_word(response, "CompareExchange").await
    }

    async fn load(&self, addr: SlotAddr) -> Result<u32> {
        if addr.rank == self.rank {
            return self.local.load(addr.offset);
        }

        let url = self.url(addr.rank, &format!("{}/{}", ENDPOINT_LOAD, addr.offset))?;
        let response = self.get_with_retry(url, REQUEST_TIMEOUT, REQUEST_ATTEMPTS).await?;

        self.remote_word(response, "Load").await
    }

    async fn read(&self, addr: SlotAddr) -> Result<Option<R>> {
        if addr.rank == self.rank {
            return self.local.read(addr.offset);
        }

        let url = self.url(addr.rank, &format!("{}/{}", ENDPOINT_READ, addr.offset))?;
        let response = self.get_with_retry(url, REQUEST_TIMEOUT, REQUEST_ATTEMPTS).await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Read request failed {}", response.status()));
        }

        let read: ReadResponse = response.json().await?;
        match read.record_json {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, addr: SlotAddr, record: R) -> Result<()> {
        if addr.rank == self.rank {
            return self.local.write(addr.offset, record);
        }

        let payload = WriteRequest {
            offset: addr.offset,
            record_json: serde_json::to_string(&record)?,
        };
        // Single attempt: a replayed write would collide with the first one.
        let response = self
            .http_client
            .post(self.url(addr.rank, ENDPOINT_WRITE)?)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(anyhow::anyhow!(
                "Ownership violation writing rank {} offset {}",
                addr.rank,
                addr.offset
            ));
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Write failed: {}", response.status()));
        }

        Ok(())
    }
}
