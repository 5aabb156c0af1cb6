//! Wire types shared by the transfer server and client.

use crate::transaction::Stage;
use serde::{Deserialize, Serialize};

pub const ROUTE_CONNECT: &str = "/connect";
pub const ROUTE_REQUEST_TRANSACTION: &str = "/request-transaction";
pub const ROUTE_CONFIRM_TRANSACTION: &str = "/confirm-transaction";
pub const ROUTE_CANCEL_TRANSACTION: &str = "/cancel-transaction";
/// The transaction id follows as the last path segment
pub const ROUTE_START_TRANSACTION: &str = "/start-transaction";

/// Reachability probe; the caller introduces itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub hostname: String,
    pub username: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReply {
    pub status: String,
    pub hostname: String,
    pub username: String,
}

/// Proposal from a sender to a receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTransaction {
    pub hostname: String,
    pub username: String,
    pub address: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_save_folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReply {
    pub transaction_id: String,
}

/// Receiver accepted; sent to the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmTransaction {
    pub transaction_id: String,
    #[serde(default)]
    pub save_folder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelTransaction {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartReply {
    pub status: String,
    pub bytes_written: u64,
}

pub fn start_route(transaction_id: &str) -> String {
    format!("{}/{}", ROUTE_START_TRANSACTION, transaction_id)
}
