//! HTTP transfer protocol between peers.
//!
//! This module provides:
//! - Wire types for the request/confirm/cancel/start handshake
//! - The transfer server (axum router) answering peer calls
//! - The transfer client (reqwest) issuing calls toward a peer
//! - Streaming receive of the file payload

pub mod client;
pub mod constants;
pub mod protocol;
pub mod receiver;
pub mod response;
pub mod server;
pub mod utils;

// Re-export public API
pub use client::TransferClient;
pub use constants::{CHUNK_SIZE, DEFAULT_TRANSFER_PORT};
pub use response::{ErrorBody, SimpleResponse};
pub use server::{bind, bind_any, create_router, run_server};
