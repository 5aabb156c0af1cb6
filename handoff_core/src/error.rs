//! Error taxonomy for the transfer engine.
//!
//! Network errors come from outbound calls, protocol errors reject a call
//! without touching local state, I/O errors fail a running transfer.

use crate::transaction::Stage;

pub type TransferResult<T> = std::result::Result<T, TransferError>;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("unknown host {0}")]
    UnknownHost(String),

    #[error("transaction {id} cannot move from {from} to {to}")]
    IllegalTransition { id: String, from: Stage, to: Stage },

    #[error("host {0} is busy with another transaction")]
    HostBusy(String),

    #[error("peer {address} is unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {address} failed: {source}")]
    Network {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer rejected the call ({status} {kind}): {message}")]
    Rejected {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Stable machine-readable code carried in error bodies on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::UnknownTransaction(_) => "unknown_transaction",
            TransferError::UnknownHost(_) => "unknown_host",
            TransferError::IllegalTransition { .. } => "illegal_transition",
            TransferError::HostBusy(_) => "host_busy",
            TransferError::Unreachable { .. } => "unreachable",
            TransferError::Network { .. } => "network",
            TransferError::Rejected { .. } => "rejected",
            TransferError::Malformed(_) => "malformed",
            TransferError::Cancelled => "cancelled",
            TransferError::Io(_) => "io",
        }
    }

    /// HTTP status used when this error answers an inbound call.
    pub fn status_code(&self) -> u16 {
        match self {
            TransferError::UnknownTransaction(_) | TransferError::UnknownHost(_) => 404,
            TransferError::IllegalTransition { .. }
            | TransferError::HostBusy(_)
            | TransferError::Cancelled => 409,
            TransferError::Malformed(_) => 400,
            TransferError::Unreachable { .. }
            | TransferError::Network { .. }
            | TransferError::Rejected { .. } => 502,
            TransferError::Io(_) => 500,
        }
    }

    /// True for errors that reject a call by protocol rules rather than a failure.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            TransferError::UnknownTransaction(_)
                | TransferError::UnknownHost(_)
                | TransferError::IllegalTransition { .. }
                | TransferError::HostBusy(_)
                | TransferError::Rejected { .. }
                | TransferError::Malformed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_map_to_client_statuses() {
        let err = TransferError::IllegalTransition {
            id: "abc".to_string(),
            from: Stage::Requested,
            to: Stage::Transferring,
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.kind(), "illegal_transition");
        assert!(err.is_protocol());
        assert_eq!(
            err.to_string(),
            "transaction abc cannot move from REQUESTED to TRANSFERRING"
        );

        assert_eq!(TransferError::UnknownTransaction("x".into()).status_code(), 404);
        assert_eq!(TransferError::HostBusy("h".into()).status_code(), 409);
    }

    #[test]
    fn test_io_error_is_not_protocol() {
        let err = TransferError::from(std::io::Error::other("disk full"));
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_protocol());
    }
}
