//! Outbound side of the protocol: one call per server route.

use crate::error::{TransferError, TransferResult};
use crate::identity::LocalIdentity;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::constants::CHUNK_SIZE;
use super::protocol::{
    CancelTransaction, ConfirmTransaction, ConnectReply, ROUTE_CANCEL_TRANSACTION,
    ROUTE_CONFIRM_TRANSACTION, ROUTE_CONNECT, ROUTE_REQUEST_TRANSACTION, RequestTransaction,
    StartReply, TransactionReply, start_route,
};
use super::response::SimpleResponse;

#[derive(Debug, Clone)]
pub struct TransferClient {
    http: reqwest::Client,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl TransferClient {
    /// The timeout applies to JSON calls only; the payload stream of
    /// `start_transaction` runs until done, cancelled or failed.
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(probe_timeout)
            .build()?;
        Ok(Self {
            http,
            request_timeout,
            probe_timeout,
        })
    }

    fn url(address: &str, route: &str) -> String {
        format!("http://{}{}", address, route)
    }

    /// POST a JSON body to `route` on the peer at `address`
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        address: &str,
        route: &str,
        body: &B,
    ) -> TransferResult<SimpleResponse> {
        let response = self
            .http
            .post(Self::url(address, route))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|source| TransferError::Network {
                address: address.to_string(),
                source,
            })?;
        SimpleResponse::from_reqwest(response).await
    }

    /// Reachability probe. Introduces us to the peer and fails fast with
    /// `Unreachable` instead of waiting for the full request timeout.
    pub async fn connect(
        &self,
        address: &str,
        identity: &LocalIdentity,
    ) -> TransferResult<ConnectReply> {
        let response = self
            .http
            .post(Self::url(address, ROUTE_CONNECT))
            .timeout(self.probe_timeout)
            .json(&identity.connect_request())
            .send()
            .await
            .map_err(|source| TransferError::Unreachable {
                address: address.to_string(),
                source,
            })?;
        SimpleResponse::from_reqwest(response).await?.decode()
    }

    /// Propose a file; returns the transaction id chosen by the receiver
    pub async fn request_transaction(
        &self,
        address: &str,
        request: &RequestTransaction,
    ) -> TransferResult<String> {
        let reply: TransactionReply = self
            .request(address, ROUTE_REQUEST_TRANSACTION, request)
            .await?
            .decode()?;
        Ok(reply.transaction_id)
    }

    pub async fn confirm_transaction(
        &self,
        address: &str,
        transaction_id: &str,
        save_folder: &Path,
    ) -> TransferResult<()> {
        let body = ConfirmTransaction {
            transaction_id: transaction_id.to_string(),
            save_folder: save_folder.to_string_lossy().to_string(),
        };
        let _: TransactionReply = self
            .request(address, ROUTE_CONFIRM_TRANSACTION, &body)
            .await?
            .decode()?;
        Ok(())
    }

    pub async fn cancel_transaction(&self, address: &str, transaction_id: &str) -> TransferResult<()> {
        let body = CancelTransaction {
            transaction_id: transaction_id.to_string(),
        };
        self.request(address, ROUTE_CANCEL_TRANSACTION, &body)
            .await?;
        Ok(())
    }

    /// Stream `file_path` to the receiver in `CHUNK_SIZE` reads.
    /// Returns the number of bytes the receiver wrote.
    pub async fn start_transaction(
        &self,
        address: &str,
        transaction_id: &str,
        file_path: &Path,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let file = File::open(file_path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));

        tracing::info!(
            "Streaming {:?} to {} (transaction {})",
            file_path,
            address,
            transaction_id
        );

        let send = self
            .http
            .post(Self::url(address, &start_route(transaction_id)))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send();

        let response = tokio::select! {
            res = send => res.map_err(|source| TransferError::Network {
                address: address.to_string(),
                source,
            })?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };

        let reply: StartReply = SimpleResponse::from_reqwest(response).await?.decode()?;
        Ok(reply.bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TransferClient {
        TransferClient::new(Duration::from_secs(2), Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_url_layout() {
        assert_eq!(
            TransferClient::url("10.0.0.2:56934", ROUTE_CONNECT),
            "http://10.0.0.2:56934/connect"
        );
        assert_eq!(
            TransferClient::url("[fe80::1]:56934", &start_route("abc")),
            "http://[fe80::1]:56934/start-transaction/abc"
        );
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let identity = LocalIdentity::new("alpha", "alice", "127.0.0.1:1");
        let err = client()
            .connect(&format!("127.0.0.1:{}", port), &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_start_with_missing_file_is_io_error() {
        let err = client()
            .start_transaction(
                "127.0.0.1:1",
                "abc",
                Path::new("/definitely/not/here.bin"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
