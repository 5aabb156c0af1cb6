//! Transaction records and the stage state machine.
//!
//! Each side of a transfer owns its own record, correlated with the peer's
//! record by `transaction_id`. The receiver generates the id; the sender
//! adopts it from the reply to `request-transaction`.

use crate::error::{TransferError, TransferResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Position of a transaction in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Requested,
    Confirmed,
    Transferring,
    Completed,
    Cancelled,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled | Stage::Failed)
    }

    /// Legal moves: REQUESTED -> CONFIRMED -> TRANSFERRING -> COMPLETED | FAILED,
    /// plus CANCELLED from any non-terminal stage.
    pub fn can_advance_to(self, next: Stage) -> bool {
        match (self, next) {
            (Stage::Requested, Stage::Confirmed)
            | (Stage::Confirmed, Stage::Transferring)
            | (Stage::Transferring, Stage::Completed)
            | (Stage::Transferring, Stage::Failed) => true,
            (from, Stage::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Requested => "REQUESTED",
            Stage::Confirmed => "CONFIRMED",
            Stage::Transferring => "TRANSFERRING",
            Stage::Completed => "COMPLETED",
            Stage::Cancelled => "CANCELLED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Which side of the transfer this host plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// We send the file.
    Outbound,
    /// We receive the file.
    Inbound,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub transaction_id: String,
    pub direction: Direction,
    /// Normalized address of the remote peer
    pub address: String,
    pub file_name: String,
    /// Source file (outbound) or final destination once known (inbound)
    pub file_path: Option<PathBuf>,
    pub file_size: u64,
    pub save_folder: PathBuf,
    pub stage: Stage,
    /// Set when the record reaches a terminal stage
    pub finished_at: Option<Instant>,
    /// Fired when the record is cancelled; aborts an in-flight stream
    pub cancel_token: CancellationToken,
}

impl Transaction {
    pub fn inbound(
        transaction_id: &str,
        address: &str,
        file_name: &str,
        file_size: u64,
        save_folder: PathBuf,
    ) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            direction: Direction::Inbound,
            address: address.to_string(),
            file_name: file_name.to_string(),
            file_path: None,
            file_size,
            save_folder,
            stage: Stage::Requested,
            finished_at: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn outbound(
        transaction_id: &str,
        address: &str,
        file_name: &str,
        file_path: PathBuf,
        file_size: u64,
    ) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            direction: Direction::Outbound,
            address: address.to_string(),
            file_name: file_name.to_string(),
            file_path: Some(file_path),
            file_size,
            save_folder: PathBuf::new(),
            stage: Stage::Requested,
            finished_at: None,
            cancel_token: CancellationToken::new(),
        }
    }
}

/// Terminal records kept for lookups before the oldest are dropped.
pub const DEFAULT_FINISHED_HISTORY: usize = 256;

/// All transactions known to this host, both directions.
///
/// Every stage change happens under the store lock, so transitions of one
/// transaction are totally ordered. Live records are never pruned.
pub struct TransactionStore {
    records: Mutex<HashMap<String, Transaction>>,
    finished_history: usize,
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::with_history(DEFAULT_FINISHED_HISTORY)
    }
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(finished_history: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            finished_history,
        }
    }

    pub async fn insert(&self, transaction: Transaction) {
        let mut records = self.records.lock().await;
        records.insert(transaction.transaction_id.clone(), transaction);
        Self::prune_finished(&mut records, self.finished_history);
    }

    /// Drop the oldest terminal records beyond `keep`.
    fn prune_finished(records: &mut HashMap<String, Transaction>, keep: usize) {
        let mut finished: Vec<(Instant, String)> = records
            .values()
            .filter_map(|t| t.finished_at.map(|at| (at, t.transaction_id.clone())))
            .collect();
        if finished.len() <= keep {
            return;
        }

        finished.sort();
        let excess = finished.len() - keep;
        for (_, transaction_id) in finished.into_iter().take(excess) {
            records.remove(&transaction_id);
        }
        tracing::debug!("Pruned {} finished transactions", excess);
    }

    pub async fn get(&self, transaction_id: &str) -> Option<Transaction> {
        self.records.lock().await.get(transaction_id).cloned()
    }

    pub async fn stage(&self, transaction_id: &str) -> Option<Stage> {
        self.records
            .lock()
            .await
            .get(transaction_id)
            .map(|t| t.stage)
    }

    pub async fn list(&self) -> Vec<Transaction> {
        self.records.lock().await.values().cloned().collect()
    }

    /// The non-terminal transaction with `address`, if any.
    pub async fn active_for(&self, address: &str) -> Option<Transaction> {
        self.records
            .lock()
            .await
            .values()
            .find(|t| t.address == address && !t.stage.is_terminal())
            .cloned()
    }

    /// Move a transaction of the given direction to `to`, applying `update`
    /// in the same critical section. Returns the updated record.
    ///
    /// A record held for the other direction is reported as unknown: the
    /// caller addressed a transaction this side does not own.
    pub async fn transition<F>(
        &self,
        transaction_id: &str,
        direction: Direction,
        to: Stage,
        update: F,
    ) -> TransferResult<Transaction>
    where
        F: FnOnce(&mut Transaction),
    {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(transaction_id)
            .filter(|t| t.direction == direction)
            .ok_or_else(|| TransferError::UnknownTransaction(transaction_id.to_string()))?;

        if !record.stage.can_advance_to(to) {
            return Err(TransferError::IllegalTransition {
                id: transaction_id.to_string(),
                from: record.stage,
                to,
            });
        }

        update(record);
        record.stage = to;
        if to.is_terminal() {
            record.finished_at = Some(Instant::now());
        }
        Ok(record.clone())
    }

    pub async fn advance(
        &self,
        transaction_id: &str,
        direction: Direction,
        to: Stage,
    ) -> TransferResult<Transaction> {
        self.transition(transaction_id, direction, to, |_| {}).await
    }

    /// Cancel a transaction of either direction and abort its stream.
    ///
    /// Returns `Ok(None)` when the record is already terminal, so repeated
    /// cancels are no-ops.
    pub async fn cancel(&self, transaction_id: &str) -> TransferResult<Option<Transaction>> {
        let cancelled = self.mark_cancelled(transaction_id).await?;
        if let Some(transaction) = &cancelled {
            transaction.cancel_token.cancel();
        }
        Ok(cancelled)
    }

    /// Move to CANCELLED without firing the token. The caller aborts the
    /// stream itself once the peer has been told.
    pub async fn mark_cancelled(&self, transaction_id: &str) -> TransferResult<Option<Transaction>> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(transaction_id)
            .ok_or_else(|| TransferError::UnknownTransaction(transaction_id.to_string()))?;

        if record.stage.is_terminal() {
            return Ok(None);
        }

        record.stage = Stage::Cancelled;
        record.finished_at = Some(Instant::now());
        Ok(Some(record.clone()))
    }
}
