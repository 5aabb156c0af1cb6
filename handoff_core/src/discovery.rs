//! LAN discovery over UDP broadcast.
//!
//! Every round the service announces this host, listens for peer
//! announcements until the round deadline, then drops hosts that went quiet.

use crate::config::AppConfig;
use crate::error::TransferResult;
use crate::identity::LocalIdentity;
use crate::registry::{Host, HostRegistry};
use crate::transfer::utils::{normalize_address, peer_address};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Magic bytes to identify our app's packets (6 bytes: "HNDOF\0")
pub const MAGIC_BYTES: &[u8] = b"HNDOF\x00";

/// Large enough for magic bytes + announcement JSON
const MAX_DATAGRAM: usize = 2048;

/// What a host broadcasts about itself each round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub instance_id: String,
    pub hostname: String,
    pub username: String,
    /// `ip:port` of the announcing host's transfer server
    pub address: String,
}

impl Announcement {
    /// Magic bytes followed by the JSON body
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let json_bytes = serde_json::to_vec(self)?;
        let mut packet = MAGIC_BYTES.to_vec();
        packet.extend_from_slice(&json_bytes);
        Ok(packet)
    }

    /// `None` for anything that is not one of our announcements
    pub fn decode(packet: &[u8]) -> Option<Self> {
        let data = packet.strip_prefix(MAGIC_BYTES)?;
        serde_json::from_slice(data).ok()
    }
}

pub struct DiscoveryService {
    socket: UdpSocket,
    broadcast_target: SocketAddr,
    registry: Arc<HostRegistry>,
    identity: LocalIdentity,
    transfer_port: u16,
    interval: Duration,
    host_ttl: Duration,
}

impl DiscoveryService {
    /// Bind `bind_addr` with broadcast enabled. Announcements go to
    /// `broadcast_target`, normally `255.255.255.255:<discovery port>`.
    pub async fn bind(
        bind_addr: SocketAddr,
        broadcast_target: SocketAddr,
        registry: Arc<HostRegistry>,
        identity: LocalIdentity,
        config: &AppConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            broadcast_target,
            registry,
            identity,
            transfer_port: config.transfer_port,
            interval: config.broadcast_interval(),
            host_ttl: config.host_ttl(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_announcement(&self) -> io::Result<()> {
        self.send_announcement_to(self.broadcast_target).await
    }

    pub async fn send_announcement_to(&self, target: SocketAddr) -> io::Result<()> {
        let packet = self.identity.announcement().encode()?;
        self.socket.send_to(&packet, target).await?;
        Ok(())
    }

    /// Apply one datagram to the registry. Returns true if it was a peer's
    /// announcement; our own broadcasts and foreign traffic are ignored.
    pub async fn handle_packet(&self, packet: &[u8], source: SocketAddr) -> bool {
        let Some(announcement) = Announcement::decode(packet) else {
            tracing::trace!("Ignoring foreign datagram from {}", source);
            return false;
        };
        if announcement.instance_id == self.identity.instance_id {
            return false;
        }

        let address = peer_address(&announcement.address, source.ip(), self.transfer_port);
        let host = Host::discovered(&address, &announcement.hostname, &announcement.username);
        if self.registry.upsert(host).await {
            tracing::info!("Discovered {} at {}", announcement.hostname, address);
        }
        true
    }

    /// Receive announcements until `deadline`. A socket error is logged and
    /// the rest of the round is waited out. Returns the announcements accepted.
    pub async fn listen_until(&self, deadline: Instant) -> usize {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut accepted = 0;

        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok((len, source))) => {
                    if self.handle_packet(&buf[..len], source).await {
                        accepted += 1;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Discovery receive failed: {}", e);
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
            }
        }
        accepted
    }

    /// Drop discovered hosts not heard from within the TTL
    pub async fn sweep(&self) -> Vec<String> {
        let evicted = self
            .registry
            .sweep_stale(std::time::Instant::now(), self.host_ttl)
            .await;
        for address in &evicted {
            tracing::info!("Host {} went quiet, removed", address);
        }
        evicted
    }

    /// Announce, listen for one interval, sweep
    pub async fn run_round(&self) {
        let deadline = Instant::now() + self.interval;
        if let Err(e) = self.send_announcement().await {
            tracing::warn!("Discovery broadcast to {} failed: {}", self.broadcast_target, e);
        }
        self.listen_until(deadline).await;
        self.sweep().await;
    }

    /// Run rounds until `cancel_token` fires
    pub async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        tracing::info!(
            "Discovery running on {:?}, announcing to {}",
            self.local_addr().ok(),
            self.broadcast_target
        );
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = self.run_round() => {}
            }
        }
        tracing::info!("Discovery stopped");
    }
}

/// Add a host by hand. It is never evicted for staleness.
/// Returns the normalized address.
pub async fn add_manual(
    registry: &HostRegistry,
    hostname: &str,
    address: &str,
    default_port: u16,
) -> TransferResult<String> {
    let address = normalize_address(address, default_port)?;
    registry.upsert_manual(hostname, &address).await;
    tracing::info!("Added manual host {} at {}", hostname, address);
    Ok(address)
}
