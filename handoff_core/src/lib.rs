use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod node;
pub mod registry;
pub mod transaction;
pub mod transfer;

use config::AppConfig;
use discovery::DiscoveryService;
use identity::LocalIdentity;
use node::Node;
use registry::{HostRegistry, HostSnapshot};
use transaction::{Direction, Stage, TransactionStore};
use transfer::TransferClient;

pub use error::{TransferError, TransferResult};

//Command from UI to Core
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Propose a file to the peer at `address`
    RequestTransaction { address: String, file_path: PathBuf },
    /// Accept an inbound proposal; `None` saves into the configured folder
    ConfirmTransaction {
        transaction_id: String,
        save_folder: Option<PathBuf>,
    },
    /// Cancel a transaction in either direction
    CancelTransaction { transaction_id: String },
    AddManualHost { hostname: String, address: String },
    RemoveHost { address: String },
}

//Report from Core to UI
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status(String),

    /// The visible host set changed
    HostsUpdated(Vec<HostSnapshot>),

    /// A peer wants to send us a file; answer with Confirm or Cancel
    TransactionRequested {
        address: String,
        hostname: String,
        username: String,
        file_name: String,
        transaction_id: String,
        /// Where the file lands unless the user picks another folder
        save_folder: PathBuf,
    },

    TransactionUpdated {
        transaction_id: String,
        direction: Direction,
        stage: Stage,
    },

    /// `path` is the source file when sending, the saved file when receiving
    TransferCompleted {
        transaction_id: String,
        path: PathBuf,
    },

    TransactionFailed {
        transaction_id: String,
        reason: String,
    },

    Error(String),
}

pub async fn run_backend(
    mut config: AppConfig,
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    event_tx: mpsc::Sender<AppEvent>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // 1. Bind the transfer server first so the identity carries the real port
    let listener = transfer::bind_any(config.transfer_port)
        .await
        .with_context(|| format!("cannot bind transfer port {}", config.transfer_port))?;
    let transfer_port = listener.local_addr()?.port();
    // Port 0 only applies to our own listener; peers are assumed on the default
    if config.transfer_port == 0 {
        config.transfer_port = transfer::DEFAULT_TRANSFER_PORT;
    }

    let identity = LocalIdentity::detect(transfer_port);
    let registry = Arc::new(HostRegistry::new());
    let transactions = Arc::new(TransactionStore::new());
    let client = TransferClient::new(config.request_timeout(), config.probe_timeout())
        .context("cannot build HTTP client")?;

    let node = Arc::new(Node::new(
        identity.clone(),
        config.clone(),
        registry.clone(),
        transactions,
        client,
        event_tx.clone(),
    ));

    let _ = event_tx
        .send(AppEvent::Status(format!(
            "{} ({}) listening at {}",
            identity.hostname, identity.username, identity.address
        )))
        .await;

    // 2. Transfer server
    let server_node = node.clone();
    let server_shutdown = shutdown.clone();
    let server_event_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = transfer::run_server(listener, server_node, server_shutdown).await {
            tracing::error!("Transfer server stopped: {}", e);
            let _ = server_event_tx
                .send(AppEvent::Error(format!("Transfer server stopped: {}", e)))
                .await;
        }
    });

    // 3. Discovery. Without it the node still works with manual hosts.
    let discovery_bind = SocketAddr::from(([0, 0, 0, 0], config.discovery_port));
    let broadcast_target = SocketAddr::from(([255, 255, 255, 255], config.discovery_port));
    match DiscoveryService::bind(
        discovery_bind,
        broadcast_target,
        registry.clone(),
        identity,
        &config,
    )
    .await
    {
        Ok(service) => {
            tokio::spawn(Arc::new(service).run(shutdown.clone()));
        }
        Err(e) => {
            tracing::error!("Failed to bind discovery port {}: {}", config.discovery_port, e);
            let _ = event_tx
                .send(AppEvent::Error(format!(
                    "Cant bind discovery port {}: {}",
                    config.discovery_port, e
                )))
                .await;
        }
    }

    // 4. Forward registry changes to the UI
    let mut feed = registry.subscribe();
    let feed_tx = event_tx.clone();
    tokio::spawn(async move {
        while feed.changed().await.is_ok() {
            let hosts = feed.borrow_and_update().clone();
            if feed_tx.send(AppEvent::HostsUpdated(hosts)).await.is_err() {
                break;
            }
        }
    });

    // Main loop: Wait for commands from UI
    while let Some(cmd) = cmd_rx.recv().await {
        tracing::debug!("Command: {:?}", cmd);
        tokio::spawn(node.clone().execute(cmd));
    }

    shutdown.cancel();
    Ok(())
}
