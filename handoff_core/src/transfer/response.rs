//! Shared HTTP response handling.
//!
//! Outbound calls decode into a `SimpleResponse` or a `TransferError`;
//! inbound handlers render `TransferError` as an `ErrorBody` so both
//! sides agree on the error format.

use crate::error::{TransferError, TransferResult};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON body of every non-success answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Decoded body and headers of a successful outbound call
#[derive(Debug, Clone)]
pub struct SimpleResponse {
    data: Value,
    headers: HeaderMap,
}

impl SimpleResponse {
    pub fn new(data: Value, headers: HeaderMap) -> Self {
        Self { data, headers }
    }

    /// Turn a peer's answer into a `SimpleResponse`, or into
    /// `TransferError::Rejected` when the status is not a success.
    pub async fn from_reqwest(response: reqwest::Response) -> TransferResult<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            TransferError::Malformed(format!("unreadable response body: {}", e))
        })?;

        if !status.is_success() {
            let (kind, message) = match serde_json::from_slice::<ErrorBody>(&body) {
                Ok(err) => (err.error, err.message),
                Err(_) => (
                    "http".to_string(),
                    String::from_utf8_lossy(&body).trim().to_string(),
                ),
            };
            return Err(TransferError::Rejected {
                status: status.as_u16(),
                kind,
                message,
            });
        }

        let data = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| TransferError::Malformed(format!("invalid JSON reply: {}", e)))?
        };
        Ok(Self { data, headers })
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn decode<T: DeserializeOwned>(&self) -> TransferResult<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| TransferError::Malformed(format!("unexpected reply shape: {}", e)))
    }
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_typed_reply() {
        let response = SimpleResponse::new(json!({"transaction_id": "abc"}), HeaderMap::new());
        let reply: crate::transfer::protocol::TransactionReply = response.decode().unwrap();
        assert_eq!(reply.transaction_id, "abc");
        assert_eq!(response.data()["transaction_id"], "abc");
        assert!(response.headers().is_empty());

        let err = response
            .decode::<crate::transfer::protocol::StartReply>()
            .unwrap_err();
        assert!(matches!(err, TransferError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_error_renders_error_body() {
        let response = TransferError::HostBusy("10.0.0.2:56934".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "host_busy");
        assert!(body.message.contains("10.0.0.2:56934"));
    }
}
