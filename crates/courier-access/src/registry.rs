use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use courier_types::envelope::Envelope;
use courier_types::message::UserId;

/// What the registry keeps per live session: the outbound queue and the
/// token that tears the session down.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub outbound: mpsc::Sender<Envelope>,
    pub cancel: CancellationToken,
}

/// Live connections for users attached to this access node.
///
/// One lock, held only for map manipulation. Delivery always goes through a
/// connection's own outbound queue, never a socket write under the lock.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<UserId, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A second login for the same user evicts the
    /// previous session: its token is cancelled, which closes the old socket.
    pub fn add(&self, user: UserId, handle: ConnectionHandle) {
        let evicted = {
            let mut map = self.inner.lock().expect("registry lock poisoned");
            map.insert(user.clone(), handle)
        };
        if let Some(old) = evicted {
            warn!(
                "registry: {} logged in again, evicting connection {}",
                user, old.conn_id
            );
            old.cancel.cancel();
        }
    }

    /// Compare-and-delete: removes the entry only if it still belongs to
    /// `conn_id`, so a stale cleanup cannot evict a newer login.
    pub fn remove(&self, user: &UserId, conn_id: Uuid) -> bool {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        match map.get(user) {
            Some(handle) if handle.conn_id == conn_id => {
                map.remove(user);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .get(user)
            .cloned()
    }

    /// Best-effort fan-out to every registered connection. A full outbound
    /// queue drops that copy rather than blocking the caller. Returns how
    /// many connections accepted the envelope.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let handles: Vec<ConnectionHandle> = {
            let map = self.inner.lock().expect("registry lock poisoned");
            map.values().cloned().collect()
        };

        let mut delivered = 0;
        for handle in handles {
            match handle.outbound.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "registry: outbound queue full for connection {}, dropping broadcast",
                        handle.conn_id
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Current registered-connection count.
    pub fn snapshot(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::envelope::MessageKind;

    fn handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ConnectionHandle {
                conn_id: Uuid::new_v4(),
                outbound: tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_second_login_evicts_and_cancels_the_first() {
        let registry = Registry::new();
        let user = UserId::from("alice");

        let (first, _rx1) = handle(4);
        let first_cancel = first.cancel.clone();
        registry.add(user.clone(), first);

        let (second, _rx2) = handle(4);
        let second_id = second.conn_id;
        registry.add(user.clone(), second);

        assert_eq!(registry.snapshot(), 1);
        assert!(first_cancel.is_cancelled());
        assert_eq!(registry.get(&user).unwrap().conn_id, second_id);
    }

    #[tokio::test]
    async fn test_stale_remove_is_a_no_op() {
        let registry = Registry::new();
        let user = UserId::from("alice");

        let (current, _rx) = handle(4);
        let current_id = current.conn_id;
        registry.add(user.clone(), current);

        // A cleanup racing in from an older, already-evicted connection.
        assert!(!registry.remove(&user, Uuid::new_v4()));
        assert_eq!(registry.snapshot(), 1);

        assert!(registry.remove(&user, current_id));
        assert_eq!(registry.snapshot(), 0);
        assert!(registry.get(&user).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_skips_full_queues() {
        let registry = Registry::new();

        let (fast, mut fast_rx) = handle(4);
        registry.add(UserId::from("fast"), fast);

        // Capacity-one queue, pre-filled so the broadcast copy won't fit.
        let (slow, _slow_rx) = handle(1);
        slow.outbound
            .try_send(Envelope::control(MessageKind::Keepalive, None))
            .unwrap();
        registry.add(UserId::from("slow"), slow);

        let envelope = Envelope::control(MessageKind::Keepalive, None);
        assert_eq!(registry.broadcast(&envelope), 1);
        assert_eq!(fast_rx.recv().await.unwrap().kind, MessageKind::Keepalive);
    }
}
