//! Length-prefixed JSON RPC over TCP.
//!
//! Frames are a 4-byte big-endian length followed by a JSON body. Requests
//! carry `{ id, method, params }`; responses `{ id, result }` or
//! `{ id, error }`. Responses may arrive out of order; the client correlates
//! by id.

pub mod client;
pub mod frame;
pub mod pool;
pub mod server;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::RpcClient;
pub use frame::FrameError;
pub use pool::{ClientPool, PoolConfig};
pub use server::{serve, Service};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("{0}")]
    Remote(String),
}
