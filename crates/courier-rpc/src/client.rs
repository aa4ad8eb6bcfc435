use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::frame;
use crate::{Request, Response, RpcError};

/// Capacity of the call queue feeding the connection's writer task.
const CALL_CHANNEL_CAPACITY: usize = 64;

type Reply = oneshot::Sender<Result<Value, RpcError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

struct Call {
    method: String,
    params: Value,
    reply: Reply,
}

/// A shareable handle to one RPC connection.
///
/// Clones share the underlying TCP stream. A writer task assigns request ids
/// and owns the write half; a reader task correlates responses to in-flight
/// calls by id. Once either task observes a transport error the handle
/// reports closed and the pool redials on the next `get`.
#[derive(Clone)]
pub struct RpcClient {
    tx: mpsc::Sender<Call>,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl RpcClient {
    pub async fn connect(addr: &str, call_timeout: Duration) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await.map_err(|e| RpcError::Dial {
            addr: addr.to_string(),
            source: e,
        })?;

        let sock_ref = socket2::SockRef::from(&stream);
        let _ = sock_ref.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(CALL_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(write_task(writer, rx, pending.clone()));
        tokio::spawn(read_task(reader, pending, closed.clone()));

        Ok(Self {
            tx,
            closed,
            call_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Issue one call and wait for its response, bounded by the call timeout.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let call = Call {
            method: method.to_string(),
            params: serde_json::to_value(params)?,
            reply: reply_tx,
        };
        self.tx.send(call).await.map_err(|_| RpcError::Closed)?;

        let result = tokio::time::timeout(self.call_timeout, reply_rx)
            .await
            .map_err(|_| RpcError::Timeout(self.call_timeout))?
            .map_err(|_| RpcError::Closed)??;

        Ok(serde_json::from_value(result)?)
    }
}

/// Drains the call queue: assign an id, park the reply, write the frame.
/// Ends when every handle is dropped or a write fails.
async fn write_task(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Call>, pending: PendingMap) {
    let mut next_id: u64 = 1;

    while let Some(call) = rx.recv().await {
        let id = next_id;
        next_id += 1;

        let request = Request {
            id,
            method: call.method,
            params: call.params,
        };
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(e) => {
                let _ = call.reply.send(Err(e.into()));
                continue;
            }
        };

        // Park the reply before the bytes hit the wire, so a fast response
        // cannot race past its slot.
        pending.lock().expect("rpc pending lock poisoned").insert(id, call.reply);

        if let Err(e) = frame::write_frame(&mut writer, &body).await {
            let reply = pending.lock().expect("rpc pending lock poisoned").remove(&id);
            if let Some(reply) = reply {
                let _ = reply.send(Err(e.into()));
            }
            break;
        }
    }
}

/// Correlates responses by id. Ends on the first transport error, flagging
/// the handle closed and failing whatever was still in flight.
async fn read_task(mut reader: OwnedReadHalf, pending: PendingMap, closed: Arc<AtomicBool>) {
    loop {
        let body = match frame::read_frame(&mut reader).await {
            Ok(body) => body,
            Err(e) => {
                debug!("rpc client: read failed: {}", e);
                break;
            }
        };

        let response: Response = match serde_json::from_slice(&body) {
            Ok(response) => response,
            Err(e) => {
                warn!("rpc client: unparseable response frame: {}", e);
                break;
            }
        };

        // Timed-out calls have dropped their receiver; the send is a no-op.
        let reply = pending
            .lock()
            .expect("rpc pending lock poisoned")
            .remove(&response.id);
        if let Some(reply) = reply {
            let outcome = match response.error {
                Some(message) => Err(RpcError::Remote(message)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
            let _ = reply.send(outcome);
        }
    }

    closed.store(true, Ordering::Release);
    let mut pending = pending.lock().expect("rpc pending lock poisoned");
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(RpcError::Closed));
    }
}
