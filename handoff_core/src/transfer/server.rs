//! Inbound side of the protocol: the axum router peers call into.

use crate::AppEvent;
use crate::error::{TransferError, TransferResult};
use crate::node::Node;
use crate::registry::Host;
use crate::transaction::{Direction, Stage, Transaction};
use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, Path, State, rejection::JsonRejection},
    http::{StatusCode, Uri},
    routing::post,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::protocol::{
    CancelTransaction, ConfirmTransaction, ConnectReply, ConnectRequest,
    ROUTE_CANCEL_TRANSACTION, ROUTE_CONFIRM_TRANSACTION, ROUTE_CONNECT,
    ROUTE_REQUEST_TRANSACTION, ROUTE_START_TRANSACTION, RequestTransaction, StartReply,
    StatusReply, TransactionReply,
};
use super::receiver::receive_file;
use super::response::ErrorBody;
use super::utils::{address_ip, peer_address, sanitize_file_name, unmap_ip};

type NodeState = State<Arc<Node>>;

/// Unwrap a JSON body, answering a bad one with our own error format
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> TransferResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| TransferError::Malformed(rejection.body_text()))
}

/// Look up a transaction and check that `remote` is the peer it belongs to.
/// A caller from another IP is told the id does not exist.
async fn caller_transaction(
    node: &Node,
    transaction_id: &str,
    remote: SocketAddr,
) -> TransferResult<Transaction> {
    let transaction = node
        .transactions
        .get(transaction_id)
        .await
        .ok_or_else(|| TransferError::UnknownTransaction(transaction_id.to_string()))?;

    if let Some(ip) = address_ip(&transaction.address) {
        if ip != unmap_ip(remote.ip()) {
            tracing::warn!(
                "Rejected call for transaction {} from foreign peer {}",
                transaction_id,
                remote
            );
            return Err(TransferError::UnknownTransaction(transaction_id.to_string()));
        }
    }
    Ok(transaction)
}

/// Handler for invalid routes
async fn not_found_handler(uri: Uri) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "not_found".to_string(),
            message: format!("no route for {}", uri.path()),
        }),
    )
}

async fn connect_handler(
    State(node): NodeState,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> TransferResult<Json<ConnectReply>> {
    let request = json_body(payload)?;
    let address = peer_address(&request.address, remote.ip(), node.config.transfer_port);
    node.registry
        .upsert(Host::discovered(&address, &request.hostname, &request.username))
        .await;
    tracing::debug!("Peer {} ({}) connected", request.hostname, address);

    Ok(Json(ConnectReply {
        status: "ok".to_string(),
        hostname: node.identity.hostname.clone(),
        username: node.identity.username.clone(),
    }))
}

async fn request_transaction_handler(
    State(node): NodeState,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    payload: Result<Json<RequestTransaction>, JsonRejection>,
) -> TransferResult<Json<TransactionReply>> {
    let request = json_body(payload)?;
    let address = peer_address(&request.address, remote.ip(), node.config.transfer_port);

    node.registry
        .reserve(Host::discovered(&address, &request.hostname, &request.username))
        .await?;

    let transaction_id = Uuid::new_v4().to_string();
    let file_name = sanitize_file_name(&request.file_name);
    let save_folder = node.config.save_folder.clone();
    let transaction = Transaction::inbound(
        &transaction_id,
        &address,
        &file_name,
        request.file_size,
        save_folder.clone(),
    );
    node.transactions.insert(transaction.clone()).await;

    tracing::info!(
        "Transaction {} requested by {} ({}): {} ({} bytes)",
        transaction_id,
        request.hostname,
        address,
        file_name,
        request.file_size
    );
    node.emit(AppEvent::TransactionRequested {
        address,
        hostname: request.hostname,
        username: request.username,
        file_name,
        transaction_id: transaction_id.clone(),
        save_folder,
    })
    .await;
    node.emit_stage(&transaction).await;

    Ok(Json(TransactionReply { transaction_id }))
}

/// The receiver accepted our proposal: record its folder and start streaming.
async fn confirm_transaction_handler(
    State(node): NodeState,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    payload: Result<Json<ConfirmTransaction>, JsonRejection>,
) -> TransferResult<Json<TransactionReply>> {
    let request = json_body(payload)?;
    let transaction_id = request.transaction_id;
    caller_transaction(&node, &transaction_id, remote).await?;

    let transaction = node
        .transactions
        .transition(&transaction_id, Direction::Outbound, Stage::Confirmed, |t| {
            t.save_folder = PathBuf::from(&request.save_folder)
        })
        .await?;
    tracing::info!("Transaction {} confirmed by {}", transaction_id, remote);
    node.emit_stage(&transaction).await;

    let worker = node.clone();
    let id = transaction_id.clone();
    tokio::spawn(async move {
        worker.begin_outbound_transfer(&id).await;
    });

    Ok(Json(TransactionReply { transaction_id }))
}

async fn cancel_transaction_handler(
    State(node): NodeState,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    payload: Result<Json<CancelTransaction>, JsonRejection>,
) -> TransferResult<Json<StatusReply>> {
    let request = json_body(payload)?;
    let transaction_id = request.transaction_id;
    caller_transaction(&node, &transaction_id, remote).await?;

    if node.cancel_local(&transaction_id).await?.is_some() {
        tracing::info!("Transaction {} cancelled by {}", transaction_id, remote);
    }
    let stage = node
        .transactions
        .stage(&transaction_id)
        .await
        .unwrap_or(Stage::Cancelled);

    Ok(Json(StatusReply {
        status: "ok".to_string(),
        stage,
    }))
}

/// Receive the payload of a confirmed transaction
async fn start_transaction_handler(
    State(node): NodeState,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path(transaction_id): Path<String>,
    body: Body,
) -> TransferResult<Json<StartReply>> {
    caller_transaction(&node, &transaction_id, remote).await?;

    // Wrong stage is rejected here, before any file is created
    let transaction = node
        .transactions
        .advance(&transaction_id, Direction::Inbound, Stage::Transferring)
        .await?;
    node.emit_stage(&transaction).await;

    let received = receive_file(
        body.into_data_stream(),
        &transaction.save_folder,
        &transaction.file_name,
        transaction.file_size,
        &transaction.cancel_token,
    )
    .await;

    match received {
        Ok(received) => {
            let finished = node
                .finish_transaction(
                    &transaction_id,
                    Direction::Inbound,
                    Stage::Completed,
                    Some(received.path.clone()),
                )
                .await;
            if finished.is_none() {
                return Err(TransferError::Cancelled);
            }

            tracing::info!(
                "Transaction {} received {} bytes into {:?}",
                transaction_id,
                received.bytes_written,
                received.path
            );
            node.emit(AppEvent::TransferCompleted {
                transaction_id,
                path: received.path,
            })
            .await;

            Ok(Json(StartReply {
                status: "ok".to_string(),
                bytes_written: received.bytes_written,
            }))
        }
        Err(TransferError::Cancelled) => Err(TransferError::Cancelled),
        Err(e) => {
            node.fail_transaction(&transaction_id, Direction::Inbound, &e)
                .await;
            Err(e)
        }
    }
}

/// Build the router answering peer calls for `node`
pub fn create_router(node: Arc<Node>) -> Router {
    let start_path = format!("{}/{{transaction_id}}", ROUTE_START_TRANSACTION);

    Router::new()
        .route(ROUTE_CONNECT, post(connect_handler))
        .route(ROUTE_REQUEST_TRANSACTION, post(request_transaction_handler))
        .route(ROUTE_CONFIRM_TRANSACTION, post(confirm_transaction_handler))
        .route(ROUTE_CANCEL_TRANSACTION, post(cancel_transaction_handler))
        .route(
            &start_path,
            post(start_transaction_handler).layer(DefaultBodyLimit::disable()),
        )
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Bind the transfer port. Port 0 picks a free one.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Bind `port` on every interface. The IPv6 wildcard also takes IPv4 peers
/// as mapped addresses; hosts without IPv6 fall back to IPv4 only.
pub async fn bind_any(port: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::debug!("IPv6 bind of port {} failed ({}), using IPv4 only", port, e);
            TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
        }
    }
}

/// Serve peer calls on `listener` until `cancel_token` fires
pub async fn run_server(
    listener: TcpListener,
    node: Arc<Node>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let router = create_router(node);
    tracing::info!("Transfer server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        cancel_token.cancelled().await;
        tracing::info!("Transfer server shutting down gracefully");
    })
    .await?;

    Ok(())
}
