//! Discovery between real sockets on loopback.

use handoff_core::config::AppConfig;
use handoff_core::discovery::{Announcement, DiscoveryService, MAGIC_BYTES};
use handoff_core::identity::LocalIdentity;
use handoff_core::registry::HostRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

fn config(interval_ms: u64, ttl_secs: u64) -> AppConfig {
    AppConfig {
        broadcast_interval_ms: interval_ms,
        host_ttl_secs: ttl_secs,
        ..AppConfig::default()
    }
}

async fn bind_service(
    identity: LocalIdentity,
    target: SocketAddr,
    config: &AppConfig,
) -> (DiscoveryService, Arc<HostRegistry>) {
    let registry = Arc::new(HostRegistry::new());
    let service = DiscoveryService::bind(
        "127.0.0.1:0".parse().unwrap(),
        target,
        registry.clone(),
        identity,
        config,
    )
    .await
    .expect("Failed to bind discovery socket");
    (service, registry)
}

#[tokio::test]
async fn test_announcement_reaches_peer() {
    let cfg = config(1000, 15);
    let unused: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let (alpha, _) = bind_service(LocalIdentity::new("alpha", "alice", "127.0.0.1:7001"), unused, &cfg).await;
    let (beta, beta_registry) =
        bind_service(LocalIdentity::new("beta", "bob", "127.0.0.1:7002"), unused, &cfg).await;

    alpha
        .send_announcement_to(beta.local_addr().unwrap())
        .await
        .unwrap();

    let accepted = beta
        .listen_until(Instant::now() + Duration::from_millis(500))
        .await;
    assert_eq!(accepted, 1);

    let hosts = beta_registry.list().await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].address, "127.0.0.1:7001");
    assert_eq!(hosts[0].hostname, "alpha");
    assert!(hosts[0].discovered);
}

#[tokio::test]
async fn test_foreign_datagrams_are_ignored() {
    let cfg = config(1000, 15);
    let (beta, beta_registry) = bind_service(
        LocalIdentity::new("beta", "bob", "127.0.0.1:7002"),
        "127.0.0.1:9".parse().unwrap(),
        &cfg,
    )
    .await;
    let target = beta.local_addr().unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    raw.send_to(b"NOTOURS{\"hostname\":\"x\"}", target).await.unwrap();
    let mut truncated = MAGIC_BYTES.to_vec();
    truncated.extend_from_slice(b"{\"instance_id\":");
    raw.send_to(&truncated, target).await.unwrap();

    let accepted = beta
        .listen_until(Instant::now() + Duration::from_millis(300))
        .await;
    assert_eq!(accepted, 0);
    assert!(beta_registry.is_empty().await);
}

#[tokio::test]
async fn test_running_service_announces_every_round() {
    let cfg = config(100, 15);
    let (beta, beta_registry) = bind_service(
        LocalIdentity::new("beta", "bob", "127.0.0.1:7002"),
        "127.0.0.1:9".parse().unwrap(),
        &cfg,
    )
    .await;
    let (alpha, _) = bind_service(
        LocalIdentity::new("alpha", "alice", "127.0.0.1:7001"),
        beta.local_addr().unwrap(),
        &cfg,
    )
    .await;

    let cancel = CancellationToken::new();
    let runner = tokio::spawn(Arc::new(alpha).run(cancel.clone()));

    // Several rounds worth of listening
    let accepted = beta
        .listen_until(Instant::now() + Duration::from_millis(550))
        .await;
    assert!(accepted >= 2, "expected repeated announcements, got {}", accepted);
    assert_eq!(beta_registry.len().await, 1);

    cancel.cancel();
    timeout(Duration::from_secs(2), runner)
        .await
        .expect("discovery did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_quiet_host_is_swept_but_manual_host_stays() {
    let cfg = config(100, 0);
    let (beta, beta_registry) = bind_service(
        LocalIdentity::new("beta", "bob", "127.0.0.1:7002"),
        "127.0.0.1:9".parse().unwrap(),
        &cfg,
    )
    .await;

    let alpha = LocalIdentity::new("alpha", "alice", "127.0.0.1:7001");
    let packet = alpha.announcement().encode().unwrap();
    assert!(beta.handle_packet(&packet, "127.0.0.1:40000".parse().unwrap()).await);
    handoff_core::discovery::add_manual(&beta_registry, "nas", "127.0.0.1:7003", 56934)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let evicted = beta.sweep().await;
    assert_eq!(evicted, vec!["127.0.0.1:7001".to_string()]);

    let hosts = beta_registry.list().await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].hostname, "nas");
}

#[test]
fn test_announcement_packet_layout() {
    let announcement = Announcement {
        instance_id: "id-1".to_string(),
        hostname: "alpha".to_string(),
        username: "alice".to_string(),
        address: "192.168.1.5:56934".to_string(),
    };
    let packet = announcement.encode().unwrap();
    assert!(packet.starts_with(MAGIC_BYTES));
    assert_eq!(Announcement::decode(&packet), Some(announcement));
}
