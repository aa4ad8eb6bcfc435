use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use courier_rpc::{RpcError, Service};
use courier_types::rpc::{Ack, KeepAliveRequest, KeepAliveResponse, PushRequest, ACCESS_PING, ACCESS_PUSH};

use crate::registry::Registry;

/// The RPC surface the logic tier calls to reach users connected here.
pub struct AccessService {
    registry: Arc<Registry>,
    /// How long a push may wait on a full outbound queue before it is
    /// reported back as a delivery failure.
    enqueue_timeout: Duration,
}

impl AccessService {
    pub fn new(registry: Arc<Registry>, enqueue_timeout: Duration) -> Self {
        Self {
            registry,
            enqueue_timeout,
        }
    }
}

#[async_trait]
impl Service for AccessService {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            ACCESS_PING => {
                let _req: KeepAliveRequest = serde_json::from_value(params)?;
                Ok(serde_json::to_value(KeepAliveResponse { ok: true })?)
            }
            ACCESS_PUSH => {
                let req: PushRequest = serde_json::from_value(params)?;
                let envelope = req.message.to_envelope();

                match req.user {
                    Some(user) => {
                        let Some(handle) = self.registry.get(&user) else {
                            return Err(RpcError::Remote(format!(
                                "user {} is not connected here",
                                user
                            )));
                        };
                        // Block-with-timeout, not drop: a stalled client
                        // surfaces as a delivery failure for the dispatch
                        // tier to retry or persist.
                        handle
                            .outbound
                            .send_timeout(envelope, self.enqueue_timeout)
                            .await
                            .map_err(|_| {
                                RpcError::Remote(format!("outbound queue for {} is stalled", user))
                            })?;
                    }
                    None => {
                        let delivered = self.registry.broadcast(&envelope);
                        debug!("push: broadcast to {} local connections", delivered);
                    }
                }

                Ok(serde_json::to_value(Ack::ok())?)
            }
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use courier_types::envelope::{ChatPayload, Envelope, MessageKind};
    use courier_types::message::{Message, UserId};

    use crate::registry::ConnectionHandle;

    fn register(registry: &Registry, user: &str, capacity: usize) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(capacity);
        registry.add(
            UserId::from(user),
            ConnectionHandle {
                conn_id: Uuid::new_v4(),
                outbound: tx,
                cancel: CancellationToken::new(),
            },
        );
        rx
    }

    fn chat(from: &str, to: Option<&str>, body: &str) -> Message {
        let payload = ChatPayload {
            from: UserId::from(from),
            to: to.map(UserId::from),
            body: body.into(),
        };
        let kind = if to.is_some() {
            MessageKind::PlainText
        } else {
            MessageKind::PushPlainText
        };
        let env = Envelope::chat(kind, &payload).unwrap();
        Message::from_envelope(&env).unwrap()
    }

    #[tokio::test]
    async fn test_push_reaches_the_target_queue() {
        let registry = Arc::new(Registry::new());
        let mut rx = register(&registry, "bob", 4);
        let service = AccessService::new(registry, Duration::from_millis(100));

        let req = PushRequest {
            user: Some(UserId::from("bob")),
            message: chat("alice", Some("bob"), "hi"),
        };
        let reply = service
            .call(ACCESS_PUSH, serde_json::to_value(&req).unwrap())
            .await
            .unwrap();
        let ack: Ack = serde_json::from_value(reply).unwrap();
        assert!(ack.ok);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.chat_payload().unwrap().body, "hi");
    }

    #[tokio::test]
    async fn test_push_to_absent_user_is_a_delivery_failure() {
        let registry = Arc::new(Registry::new());
        let service = AccessService::new(registry, Duration::from_millis(100));

        let req = PushRequest {
            user: Some(UserId::from("nobody")),
            message: chat("alice", Some("nobody"), "hi"),
        };
        let result = service
            .call(ACCESS_PUSH, serde_json::to_value(&req).unwrap())
            .await;
        assert!(matches!(result, Err(RpcError::Remote(_))));
    }

    #[tokio::test]
    async fn test_push_times_out_on_a_stalled_queue() {
        let registry = Arc::new(Registry::new());
        let _rx = register(&registry, "bob", 1);
        let service = AccessService::new(registry.clone(), Duration::from_millis(50));

        // Fill the queue so the push has to wait out the timeout.
        registry
            .get(&UserId::from("bob"))
            .unwrap()
            .outbound
            .try_send(Envelope::control(MessageKind::Keepalive, None))
            .unwrap();

        let req = PushRequest {
            user: Some(UserId::from("bob")),
            message: chat("alice", Some("bob"), "hi"),
        };
        let result = service
            .call(ACCESS_PUSH, serde_json::to_value(&req).unwrap())
            .await;
        assert!(matches!(result, Err(RpcError::Remote(_))));
    }

    #[tokio::test]
    async fn test_push_without_user_broadcasts() {
        let registry = Arc::new(Registry::new());
        let mut rx_a = register(&registry, "a", 4);
        let mut rx_b = register(&registry, "b", 4);
        let service = AccessService::new(registry, Duration::from_millis(100));

        let req = PushRequest {
            user: None,
            message: chat("system", None, "maintenance at noon"),
        };
        service
            .call(ACCESS_PUSH, serde_json::to_value(&req).unwrap())
            .await
            .unwrap();

        assert_eq!(rx_a.recv().await.unwrap().chat_payload().unwrap().body, "maintenance at noon");
        assert_eq!(rx_b.recv().await.unwrap().chat_payload().unwrap().body, "maintenance at noon");
    }

    #[tokio::test]
    async fn test_ping() {
        let registry = Arc::new(Registry::new());
        let service = AccessService::new(registry, Duration::from_millis(100));

        let req = KeepAliveRequest {
            from: "logic".into(),
        };
        let reply = service
            .call(ACCESS_PING, serde_json::to_value(&req).unwrap())
            .await
            .unwrap();
        let pong: KeepAliveResponse = serde_json::from_value(reply).unwrap();
        assert!(pong.ok);
    }
}
