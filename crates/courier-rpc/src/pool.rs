use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::RpcClient;
use crate::RpcError;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Per-call timeout applied to every client handed out by this pool.
    pub call_timeout: Duration,
    /// Clients unused for longer than this are closed by the idle sweep.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// At most one reusable client per distinct address.
///
/// The first caller for an address dials; concurrent callers wait on the
/// per-address slot and reuse the connection. Dial failures go back to the
/// caller — retry policy belongs to the dispatch tier, not the pool.
#[derive(Clone)]
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    config: PoolConfig,
}

struct Slot {
    client: Mutex<Option<RpcClient>>,
    last_used: StdMutex<Instant>,
}

impl Slot {
    fn new() -> Self {
        Self {
            client: Mutex::new(None),
            last_used: StdMutex::new(Instant::now()),
        }
    }
}

impl ClientPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Get the shared client for `addr`, dialing at most once per address
    /// even under concurrent callers. A client that observed a transport
    /// error is replaced on the next call.
    pub async fn get(&self, addr: &str) -> Result<RpcClient, RpcError> {
        let slot = {
            let mut slots = self.inner.slots.lock().await;
            slots
                .entry(addr.to_string())
                .or_insert_with(|| Arc::new(Slot::new()))
                .clone()
        };

        *slot.last_used.lock().expect("pool lock poisoned") = Instant::now();

        let mut guard = slot.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
        }

        let client = RpcClient::connect(addr, self.inner.config.call_timeout).await?;
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Background sweep closing clients unused past the idle timeout, so a
    /// long-gone peer does not pin a socket forever.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let period = (inner.config.idle_timeout / 2).max(Duration::from_millis(10));
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                let mut slots = inner.slots.lock().await;
                slots.retain(|addr, slot| {
                    let idle = slot
                        .last_used
                        .lock()
                        .expect("pool lock poisoned")
                        .elapsed();
                    if idle > inner.config.idle_timeout {
                        debug!("rpc pool: evicting idle client for {}", addr);
                        false
                    } else {
                        true
                    }
                });
            }
        })
    }
}
