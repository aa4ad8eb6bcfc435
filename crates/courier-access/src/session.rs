use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_rpc::{ClientPool, RpcError};
use courier_types::envelope::{Envelope, MessageKind};
use courier_types::message::{Message, UserId};
use courier_types::rpc::{Ack, UserEntry, LOGIC_ADD, LOGIC_LOGOUT, USER_LOGIN, USER_LOGOUT};

use crate::config::AccessConfig;
use crate::registry::{ConnectionHandle, Registry};

/// How long a fresh connection may take to present its login envelope.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-node state handed to every session.
#[derive(Clone)]
pub struct AccessState {
    pub config: Arc<AccessConfig>,
    pub registry: Arc<Registry>,
    pub pool: ClientPool,
}

enum SessionFlow {
    Continue,
    Close,
}

/// Own one WebSocket for its full duplex lifetime: login handshake, then a
/// receive loop and an outbound pump running until either side fails, the
/// client logs out, or a newer login evicts this session.
pub async fn handle_socket(socket: WebSocket, state: AccessState) {
    let (mut sender, mut receiver) = socket.split();

    let user = match wait_for_login(&mut receiver).await {
        Some(user) => user,
        None => {
            warn!("session: client failed to log in, closing");
            return;
        }
    };

    let conn_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(state.config.queue_buffer);
    let cancel = CancellationToken::new();

    state.registry.add(
        user.clone(),
        ConnectionHandle {
            conn_id,
            outbound: outbound_tx.clone(),
            cancel: cancel.clone(),
        },
    );
    info!(
        "session: {} connected ({} online here)",
        user,
        state.registry.snapshot()
    );

    let entry = UserEntry {
        user_id: user.clone(),
        server_ip: state.config.advertise_addr.clone(),
    };

    // Presence must be registered before traffic flows; a user the logic
    // tier cannot route to has no business holding a connection.
    if let Err(e) = call_logic::<Ack, _>(&state, USER_LOGIN, &entry).await {
        warn!("session: presence registration for {} failed: {}", user, e);
        state.registry.remove(&user, conn_id);
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_send = pong_received.clone();
    let pong_recv = pong_received.clone();

    let heartbeat = state.config.heartbeat;
    let cancel_send = cancel.clone();
    let mut send_task = tokio::spawn(async move {
        use futures_util::SinkExt;

        let mut heartbeat_tick = tokio::time::interval(heartbeat);
        heartbeat_tick.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = cancel_send.cancelled() => break,
                item = outbound_rx.recv() => {
                    let Some(envelope) = item else { break };
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("session: unencodable envelope: {}", e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat_tick.tick() => {
                    if pong_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("session: heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_user = user.clone();
    let recv_cancel = cancel.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = recv_cancel.cancelled() => break,
                next = receiver.next() => next,
            };
            let Some(Ok(msg)) = next else { break };

            match msg {
                WsMessage::Text(text) => {
                    let envelope: Envelope = match serde_json::from_str(&text) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            // Malformed unit: drop it, keep the connection.
                            warn!("session: {} sent a malformed envelope: {}", recv_user, e);
                            continue;
                        }
                    };
                    match handle_envelope(&recv_state, &recv_user, conn_id, envelope, &outbound_tx)
                        .await
                    {
                        SessionFlow::Continue => {}
                        SessionFlow::Close => break,
                    }
                }
                WsMessage::Pong(_) => {
                    pong_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Identity-checked cleanup: when a newer login already took the slot,
    // presence belongs to it and must not be cleared here.
    if state.registry.remove(&user, conn_id) {
        if let Err(e) = call_logic::<Ack, _>(&state, USER_LOGOUT, &entry).await {
            warn!("session: presence cleanup for {} failed: {}", user, e);
        }
        info!(
            "session: {} disconnected ({} online here)",
            user,
            state.registry.snapshot()
        );
    }
}

/// Wait for the opening login envelope, bounded by [`LOGIN_TIMEOUT`].
async fn wait_for_login(receiver: &mut SplitStream<WebSocket>) -> Option<UserId> {
    let wait = tokio::time::timeout(LOGIN_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) if envelope.kind == MessageKind::Login => {
                        return envelope.from;
                    }
                    Ok(envelope) => {
                        debug!("session: expected login, got {}", envelope.kind);
                    }
                    Err(e) => {
                        debug!("session: malformed pre-login frame: {}", e);
                    }
                }
            }
        }
        None
    });

    wait.await.ok().flatten()
}

async fn handle_envelope(
    state: &AccessState,
    user: &UserId,
    conn_id: Uuid,
    envelope: Envelope,
    outbound: &mpsc::Sender<Envelope>,
) -> SessionFlow {
    match envelope.kind {
        MessageKind::Keepalive => {
            let _ = outbound.try_send(Envelope::control(MessageKind::Keepalive, None));
            SessionFlow::Continue
        }
        MessageKind::PlainText | MessageKind::Emotion | MessageKind::PushPlainText => {
            let message = match Message::from_envelope(&envelope) {
                Ok(message) => message,
                Err(e) => {
                    warn!("session: {} sent an undecodable chat payload: {}", user, e);
                    return SessionFlow::Continue;
                }
            };
            match call_logic::<Ack, _>(state, LOGIC_ADD, &message).await {
                Ok(_) => SessionFlow::Continue,
                Err(e) => {
                    // Transport failure towards the logic tier tears the
                    // session down; the client reconnects and retries.
                    warn!("session: forwarding message from {} failed: {}", user, e);
                    SessionFlow::Close
                }
            }
        }
        MessageKind::Logout => {
            state.registry.remove(user, conn_id);
            let entry = UserEntry {
                user_id: user.clone(),
                server_ip: state.config.advertise_addr.clone(),
            };
            if let Err(e) = call_logic::<Ack, _>(state, LOGIC_LOGOUT, &entry).await {
                warn!("session: logout for {} failed: {}", user, e);
            }
            SessionFlow::Close
        }
        MessageKind::Login => {
            debug!("session: {} sent login twice, ignoring", user);
            SessionFlow::Continue
        }
    }
}

async fn call_logic<R, P>(state: &AccessState, method: &str, params: &P) -> Result<R, RpcError>
where
    R: DeserializeOwned,
    P: Serialize,
{
    let client = state.pool.get(&state.config.logic_addr).await?;
    client.call(method, params).await
}
