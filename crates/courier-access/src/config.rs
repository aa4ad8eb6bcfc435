use std::time::Duration;

use anyhow::Context;

/// Access node configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// WebSocket listen address for clients.
    pub listen_addr: String,
    /// Listen address for the AccessRPC surface the logic tier calls.
    pub rpc_listen_addr: String,
    /// Address the logic tier dials back; carried in every presence entry.
    pub advertise_addr: String,
    /// Logic node RPC address.
    pub logic_addr: String,
    /// Capacity of each connection's outbound queue.
    pub queue_buffer: usize,
    /// Server heartbeat interval; two missed pongs drop the connection.
    pub heartbeat: Duration,
    /// How long a push may wait on a full outbound queue before the logic
    /// tier sees it as a delivery failure.
    pub enqueue_timeout: Duration,
    /// Per-call timeout towards the logic tier.
    pub rpc_timeout: Duration,
    /// Idle eviction threshold for pooled RPC clients.
    pub pool_idle: Duration,
    /// WebSocket inbound message size cap.
    pub ws_max_message: usize,
    /// WebSocket write buffer size.
    pub ws_write_buffer: usize,
}

impl AccessConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let rpc_listen_addr = env_or("COURIER_ACCESS_RPC_ADDR", "0.0.0.0:4100");
        let advertise_addr = env_or(
            "COURIER_ACCESS_ADVERTISE_ADDR",
            &rpc_listen_addr.replace("0.0.0.0", "127.0.0.1"),
        );

        Ok(Self {
            listen_addr: env_or("COURIER_ACCESS_ADDR", "0.0.0.0:3000"),
            rpc_listen_addr,
            advertise_addr,
            logic_addr: env_or("COURIER_LOGIC_ADDR", "127.0.0.1:4200"),
            queue_buffer: parse("COURIER_QUEUE_BUFFER", 64usize)?,
            heartbeat: Duration::from_secs(parse("COURIER_HEARTBEAT_SECS", 15u64)?),
            enqueue_timeout: Duration::from_millis(parse("COURIER_PUSH_TIMEOUT_MS", 500u64)?),
            rpc_timeout: Duration::from_millis(parse("COURIER_RPC_TIMEOUT_MS", 5_000u64)?),
            pool_idle: Duration::from_secs(parse("COURIER_POOL_IDLE_SECS", 60u64)?),
            ws_max_message: parse("COURIER_WS_READ_BUFFER", 64 * 1024usize)?,
            ws_write_buffer: parse("COURIER_WS_WRITE_BUFFER", 64 * 1024usize)?,
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
