use anyhow::Result;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::info;

use super::types::{RendezvousMessage, ShardHandle};

const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(200);
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_DATAGRAM: usize = 65536;

pub struct RendezvousService {
    pub local_handle: ShardHandle,
    rank_count: u32,
    coordinator: SocketAddr,
    socket: Arc<UdpSocket>,
    handles: DashMap<u32, ShardHandle>,
    peers: DashMap<u32, SocketAddr>,
}

impl RendezvousService {
    pub async fn new(
        bind_addr: SocketAddr,
        coordinator: SocketAddr,
        local_handle: ShardHandle,
        rank_count: u32,
    ) -> Result<Arc<Self>> {
        if local_handle.rank >= rank_count {
            anyhow::bail!(
                "Rank {} outside of process group of {}",
                local_handle.rank,
                rank_count
            );
        }

        let socket = UdpSocket::bind(bind_addr).await?;
        info!(
            "Rank {} rendezvous socket bound on {}",
            local_handle.rank,
            socket.local_addr()?
        );

        Ok(Arc::new(Self {
            local_handle,
            rank_count,
            coordinator,
            socket: Arc::new(socket),
            handles: DashMap::new(),
            peers: DashMap::new(),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_coordinator(&self) -> bool {
        self.local_handle.rank == 0
    }

    /// Runs the handle exchange to completion.
    ///
    /// Returns the rank-ordered handle table. On the coordinator it also
    /// returns the task answering late announces, which the caller owns and
    /// must keep alive while the table is in use.
    pub async fn exchange(self: Arc<Self>) -> Result<(Vec<ShardHandle>, Option<JoinHandle<()>>)> {
        let rank = self.local_handle.rank;
        let exchange = async {
            if self.is_coordinator() {
                let handles = self.clone().coordinate().await?;
                let service = self.clone();
                let responder = tokio::spawn(async move {
                    service.respond_loop().await;
                });
                Ok::<_, anyhow::Error>((handles, Some(responder)))
            } else {
                Ok((self.clone().join().await?, None))
            }
        };

        match tokio::time::timeout(RENDEZVOUS_TIMEOUT, exchange).await {
            Ok(result) => {
                let (handles, responder) = result?;
                info!("Rank {} learned {} shard handles", rank, handles.len());
                Ok((handles, responder))
            }
            Err(_) => Err(anyhow::anyhow!(
                "Rendezvous timed out after {:?} on rank {} ({} of {} handles known)",
                RENDEZVOUS_TIMEOUT,
                rank,
                self.handles.len(),
                self.rank_count
            )),
        }
    }

    async fn coordinate(self: Arc<Self>) -> Result<Vec<ShardHandle>> {
        self.handles.insert(0, self.local_handle.clone());

        let mut buf = vec![0u8; MAX_DATAGRAM];
        while (self.handles.len() as u32) < self.rank_count {
            let (len, src) = self.socket.recv_from(&mut buf).await?;
            match bincode::deserialize::<RendezvousMessage>(&buf[..len]) {
                Ok(RendezvousMessage::Announce { handle, rank_count }) => {
                    self.register(handle, rank_count, src).await;
                }
                Ok(other) => {
                    tracing::debug!("Coordinator ignoring {:?} from {}", other, src);
                }
                Err(e) => {
                    tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                }
            }
        }

        let handles = validate_handles(
            self.handles.iter().map(|entry| entry.value().clone()).collect(),
            self.rank_count,
        )?;

        let msg = RendezvousMessage::Handles {
            handles: handles.clone(),
        };
        let encoded = bincode::serialize(&msg)?;
        let peers: Vec<(u32, SocketAddr)> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        for (rank, addr) in peers {
            if let Err(e) = self.socket.send_to(&encoded, addr).await {
                tracing::warn!("Failed to send handles to rank {}: {}", rank, e);
            }
        }

        Ok(handles)
    }

    async fn register(&self, handle: ShardHandle, rank_count: u32, src: SocketAddr) {
        if rank_count != self.rank_count {
            self.reject(
                src,
                format!(
                    "Rank {} expects {} ranks, coordinator expects {}",
                    handle.rank, rank_count, self.rank_count
                ),
            )
            .await;
            return;
        }
        if handle.rank >= self.rank_count {
            self.reject(
                src,
                format!("Rank {} outside of process group of {}", handle.rank, self.rank_count),
            )
            .await;
            return;
        }
        let conflict = self
            .handles
            .get(&handle.rank)
            .filter(|existing| *existing.value() != handle)
            .map(|existing| format!("Rank {} already announced by {:?}", handle.rank, existing.value()));
        if let Some(reason) = conflict {
            self.reject(src, reason).await;
            return;
        }

        if self.handles.insert(handle.rank, handle.clone()).is_none() {
            info!(
                "Rank {} announced shard of {} slots at {} ({}/{})",
                handle.rank,
                handle.len,
                handle.http_addr,
                self.handles.len(),
                self.rank_count
            );
        }
        self.peers.insert(handle.rank, src);
    }

    async fn reject(&self, src: SocketAddr, reason: String) {
        tracing::error!("Rejecting announce from {}: {}", src, reason);
        let msg = RendezvousMessage::Reject { reason };
        match bincode::serialize(&msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, src).await {
                    tracing::warn!("Failed to send reject to {}: {}", src, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize RendezvousMessage::Reject: {}", e),
        }
    }

    /// Answers announces that arrive after the exchange completed with the
    /// full handle table.
    async fn respond_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let handles: Vec<ShardHandle> = {
            let mut handles: Vec<ShardHandle> =
                self.handles.iter().map(|entry| entry.value().clone()).collect();
            handles.sort_by_key(|handle| handle.rank);
            handles
        };
        let encoded = match bincode::serialize(&RendezvousMessage::Handles { handles }) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize RendezvousMessage::Handles: {}", e);
                return;
            }
        };

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<RendezvousMessage>(&buf[..len]) {
                    Ok(RendezvousMessage::Announce { handle, .. }) => {
                        tracing::debug!("Late announce from rank {}, resending handles", handle.rank);
                        if let Err(e) = self.socket.send_to(&encoded, src).await {
                            tracing::warn!("Failed to resend handles to {}: {}", src, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn join(self: Arc<Self>) -> Result<Vec<ShardHandle>> {
        let announce = bincode::serialize(&RendezvousMessage::Announce {
            handle: self.local_handle.clone(),
            rank_count: self.rank_count,
        })?;

        info!(
            "Rank {} joining via coordinator {}",
            self.local_handle.rank, self.coordinator
        );

        let mut interval = tokio::time::interval(ANNOUNCE_INTERVAL);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.socket.send_to(&announce, self.coordinator).await {
                        tracing::warn!("Failed to announce to {}: {}", self.coordinator, e);
                    } else {
                        tracing::trace!("Announced rank {}", self.local_handle.rank);
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, src) = received?;
                    match bincode::deserialize::<RendezvousMessage>(&buf[..len]) {
                        Ok(RendezvousMessage::Handles { handles }) => {
                            let handles = validate_handles(handles, self.rank_count)?;
                            for handle in &handles {
                                self.handles.insert(handle.rank, handle.clone());
                            }
                            return Ok(handles);
                        }
                        Ok(RendezvousMessage::Reject { reason }) => {
                            anyhow::bail!("Coordinator rejected rank {}: {}", self.local_handle.rank, reason);
                        }
                        Ok(other) => {
                            tracing::debug!("Ignoring {:?} from {}", other, src);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                        }
                    }
                }
            }
        }
    }
}

/// Orders `handles` by rank and checks there is exactly one per rank of the
/// group.
pub fn validate_handles(mut handles: Vec<ShardHandle>, rank_count: u32) -> Result<Vec<ShardHandle>> {
    handles.sort_by_key(|handle| handle.rank);

    if handles.len() != rank_count as usize {
        anyhow::bail!(
            "Handle table has {} entries for {} ranks",
            handles.len(),
            rank_count
        );
    }
    for (expected, handle) in handles.iter().enumerate() {
        if handle.rank != expected as u32 {
            anyhow::bail!("Handle table is missing rank {}", expected);
        }
    }

    Ok(handles)
}
