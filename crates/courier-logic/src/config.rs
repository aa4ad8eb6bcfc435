use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Logic node configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct LogicConfig {
    /// RPC listen address for access nodes.
    pub rpc_addr: String,
    /// SQLite message store path.
    pub db_path: PathBuf,
    /// Capacity of the dispatch queue's inbound channel.
    pub queue_buffer: usize,
    /// Per-call timeout for delivery RPCs towards access nodes.
    pub rpc_timeout: Duration,
    /// Retry budget per message for transient storage failures.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub retry_base: Duration,
    /// Idle eviction threshold for pooled RPC clients.
    pub pool_idle: Duration,
}

impl LogicConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            rpc_addr: env_or("COURIER_LOGIC_RPC_ADDR", "0.0.0.0:4200"),
            db_path: env_or("COURIER_DB_PATH", "courier.db").into(),
            queue_buffer: parse("COURIER_QUEUE_BUFFER", 100usize)?,
            rpc_timeout: Duration::from_millis(parse("COURIER_RPC_TIMEOUT_MS", 5_000u64)?),
            max_attempts: parse("COURIER_RETRY_MAX_ATTEMPTS", 5u32)?,
            retry_base: Duration::from_millis(parse("COURIER_RETRY_BASE_MS", 200u64)?),
            pool_idle: Duration::from_secs(parse("COURIER_POOL_IDLE_SECS", 60u64)?),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {}", key)),
        Err(_) => Ok(default),
    }
}
