//! The local side of every operation: executes UI commands and the
//! sender's reaction to a confirmation, keeping registry, transactions and
//! UI events consistent.

use crate::config::AppConfig;
use crate::discovery;
use crate::error::{TransferError, TransferResult};
use crate::identity::LocalIdentity;
use crate::registry::HostRegistry;
use crate::transaction::{Direction, Stage, Transaction, TransactionStore};
use crate::transfer::TransferClient;
use crate::transfer::utils::{normalize_address, sanitize_file_name};
use crate::{AppCommand, AppEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Node {
    pub identity: LocalIdentity,
    pub config: AppConfig,
    pub registry: Arc<HostRegistry>,
    pub transactions: Arc<TransactionStore>,
    pub client: TransferClient,
    pub event_tx: mpsc::Sender<AppEvent>,
}

impl Node {
    pub fn new(
        identity: LocalIdentity,
        config: AppConfig,
        registry: Arc<HostRegistry>,
        transactions: Arc<TransactionStore>,
        client: TransferClient,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            identity,
            config,
            registry,
            transactions,
            client,
            event_tx,
        }
    }

    pub async fn emit(&self, event: AppEvent) {
        let _ = self.event_tx.send(event).await;
    }

    pub async fn emit_stage(&self, transaction: &Transaction) {
        self.emit(AppEvent::TransactionUpdated {
            transaction_id: transaction.transaction_id.clone(),
            direction: transaction.direction,
            stage: transaction.stage,
        })
        .await;
    }

    /// Run one UI command, reporting failures as `AppEvent::Error`
    pub async fn execute(self: Arc<Self>, command: AppCommand) {
        let result = match command {
            AppCommand::RequestTransaction { address, file_path } => self
                .request_transaction(&address, &file_path)
                .await
                .map(|_| ()),
            AppCommand::ConfirmTransaction {
                transaction_id,
                save_folder,
            } => self.confirm_transaction(&transaction_id, save_folder).await,
            AppCommand::CancelTransaction { transaction_id } => {
                self.cancel_transaction(&transaction_id).await
            }
            AppCommand::AddManualHost { hostname, address } => self
                .add_manual_host(&hostname, &address)
                .await
                .map(|_| ()),
            AppCommand::RemoveHost { address } => self.remove_host(&address).await,
        };

        if let Err(e) = result {
            if e.is_protocol() {
                tracing::info!("Command refused: {}", e);
            } else {
                tracing::warn!("Command failed: {}", e);
            }
            self.emit(AppEvent::Error(e.to_string())).await;
        }
    }

    /// Propose `file_path` to the peer at `address`.
    ///
    /// The host is reserved before the call and released again if the call
    /// fails, so at most one transaction per peer is ever in flight.
    pub async fn request_transaction(&self, address: &str, file_path: &Path) -> TransferResult<String> {
        let address = normalize_address(address, self.config.transfer_port)?;
        let metadata = tokio::fs::metadata(file_path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Malformed(format!(
                "{:?} is not a regular file",
                file_path
            )));
        }
        let file_name = file_path
            .file_name()
            .map(|n| sanitize_file_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "unknown_file".to_string());

        self.registry.reserve_existing(&address).await?;

        let outcome = async {
            self.client.connect(&address, &self.identity).await?;
            let request = self.identity.transaction_request(&file_name, metadata.len());
            self.client.request_transaction(&address, &request).await
        }
        .await;

        let transaction_id = match outcome {
            Ok(id) => id,
            Err(e) => {
                self.registry.mark_busy(&address, false).await;
                return Err(e);
            }
        };

        let transaction = Transaction::outbound(
            &transaction_id,
            &address,
            &file_name,
            file_path.to_path_buf(),
            metadata.len(),
        );
        self.transactions.insert(transaction.clone()).await;
        tracing::info!(
            "Requested transaction {} sending {} to {}",
            transaction_id,
            file_name,
            address
        );
        self.emit_stage(&transaction).await;
        Ok(transaction_id)
    }

    /// Accept an inbound proposal.
    ///
    /// The local record is CONFIRMED before the sender hears about it, so the
    /// sender's immediate `start-transaction` finds it ready.
    pub async fn confirm_transaction(
        &self,
        transaction_id: &str,
        save_folder: Option<PathBuf>,
    ) -> TransferResult<()> {
        let folder = save_folder.unwrap_or_else(|| self.config.save_folder.clone());
        let transaction = self
            .transactions
            .transition(transaction_id, Direction::Inbound, Stage::Confirmed, |t| {
                t.save_folder = folder.clone()
            })
            .await?;
        self.emit_stage(&transaction).await;

        if let Err(e) = self
            .client
            .confirm_transaction(&transaction.address, transaction_id, &folder)
            .await
        {
            tracing::warn!("Confirm of {} failed: {}", transaction_id, e);
            self.cancel_local(transaction_id).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Cancel locally, then tell the peer. A peer that cannot be reached
    /// does not undo the local cancel.
    ///
    /// A running stream is aborted only after the peer has answered, so the
    /// peer sees a cancel rather than a broken connection.
    pub async fn cancel_transaction(&self, transaction_id: &str) -> TransferResult<()> {
        let Some(transaction) = self.transactions.mark_cancelled(transaction_id).await? else {
            return Ok(());
        };
        self.settle_cancelled(&transaction).await;

        self.notify_cancel(&transaction).await;
        transaction.cancel_token.cancel();
        Ok(())
    }

    /// Move a record to CANCELLED and free its host.
    /// `Ok(None)` if it was already terminal.
    pub async fn cancel_local(&self, transaction_id: &str) -> TransferResult<Option<Transaction>> {
        let cancelled = self.transactions.cancel(transaction_id).await?;
        if let Some(transaction) = &cancelled {
            self.settle_cancelled(transaction).await;
        }
        Ok(cancelled)
    }

    async fn settle_cancelled(&self, transaction: &Transaction) {
        self.registry.mark_busy(&transaction.address, false).await;
        tracing::info!("Transaction {} cancelled", transaction.transaction_id);
        self.emit_stage(transaction).await;
    }

    /// Best-effort cancel call to the peer of `transaction`
    async fn notify_cancel(&self, transaction: &Transaction) {
        if let Err(e) = self
            .client
            .cancel_transaction(&transaction.address, &transaction.transaction_id)
            .await
        {
            tracing::warn!(
                "Peer {} not told about cancel of {}: {}",
                transaction.address,
                transaction.transaction_id,
                e
            );
        }
    }

    /// Move a TRANSFERRING record to COMPLETED or FAILED and free its host.
    ///
    /// A record cancelled meanwhile stays CANCELLED.
    pub async fn finish_transaction(
        &self,
        transaction_id: &str,
        direction: Direction,
        stage: Stage,
        file_path: Option<PathBuf>,
    ) -> Option<Transaction> {
        let finished = self
            .transactions
            .transition(transaction_id, direction, stage, |t| {
                if file_path.is_some() {
                    t.file_path = file_path;
                }
            })
            .await;

        match finished {
            Ok(transaction) => {
                self.registry.mark_busy(&transaction.address, false).await;
                self.emit_stage(&transaction).await;
                Some(transaction)
            }
            Err(e) => {
                tracing::debug!("Transaction {} not finished: {}", transaction_id, e);
                None
            }
        }
    }

    /// Record an I/O failure of a running transfer and surface it to the UI.
    /// Returns the failed record, or `None` if it was settled meanwhile.
    pub async fn fail_transaction(
        &self,
        transaction_id: &str,
        direction: Direction,
        reason: &TransferError,
    ) -> Option<Transaction> {
        tracing::error!("Transaction {} failed: {}", transaction_id, reason);
        let failed = self
            .finish_transaction(transaction_id, direction, Stage::Failed, None)
            .await;
        if failed.is_some() {
            self.emit(AppEvent::TransactionFailed {
                transaction_id: transaction_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        }
        failed
    }

    /// Sender side of a confirmed transaction: stream the file, then settle.
    pub async fn begin_outbound_transfer(&self, transaction_id: &str) {
        let transaction = match self
            .transactions
            .advance(transaction_id, Direction::Outbound, Stage::Transferring)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Not starting transfer {}: {}", transaction_id, e);
                return;
            }
        };
        self.emit_stage(&transaction).await;

        let source = transaction.file_path.clone().unwrap_or_default();
        let result = self
            .client
            .start_transaction(
                &transaction.address,
                transaction_id,
                &source,
                &transaction.cancel_token,
            )
            .await;

        match result {
            Ok(bytes_written) => {
                tracing::info!(
                    "Transaction {} delivered {} bytes to {}",
                    transaction_id,
                    bytes_written,
                    transaction.address
                );
                if self
                    .finish_transaction(transaction_id, Direction::Outbound, Stage::Completed, None)
                    .await
                    .is_some()
                {
                    self.emit(AppEvent::TransferCompleted {
                        transaction_id: transaction_id.to_string(),
                        path: source,
                    })
                    .await;
                }
            }
            // Cancel already settled the record and freed the host
            Err(TransferError::Cancelled) => {}
            // The receiver cancelled mid-stream and answered before its cancel call arrived
            Err(TransferError::Rejected { ref kind, .. }) if kind == "cancelled" => {
                if let Err(e) = self.cancel_local(transaction_id).await {
                    tracing::debug!("Transaction {} already gone: {}", transaction_id, e);
                }
            }
            // The receiver answered, so it has settled its own record
            Err(e @ TransferError::Rejected { .. }) => {
                self.fail_transaction(transaction_id, Direction::Outbound, &e)
                    .await;
            }
            // The receiver may never have seen a byte and still waits in CONFIRMED
            Err(e) => {
                if let Some(failed) = self
                    .fail_transaction(transaction_id, Direction::Outbound, &e)
                    .await
                {
                    self.notify_cancel(&failed).await;
                }
            }
        }
    }

    /// Add a host by hand and introduce ourselves to it.
    /// Returns the normalized address.
    pub async fn add_manual_host(&self, hostname: &str, address: &str) -> TransferResult<String> {
        let address =
            discovery::add_manual(&self.registry, hostname, address, self.config.transfer_port)
                .await?;

        // The entry stays even if the probe fails; the peer may come up later
        match self.client.connect(&address, &self.identity).await {
            Ok(reply) => {
                tracing::info!("Manual host {} answered as {}", address, reply.hostname);
            }
            Err(e) => {
                tracing::info!("Manual host {} not reachable yet: {}", address, e);
            }
        }
        Ok(address)
    }

    /// Forget a host. Busy hosts cannot be removed.
    pub async fn remove_host(&self, address: &str) -> TransferResult<()> {
        let address = normalize_address(address, self.config.transfer_port)?;
        self.registry.remove_idle(&address).await?;
        tracing::info!("Host {} removed", address);
        Ok(())
    }
}
