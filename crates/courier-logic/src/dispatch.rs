use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courier_storage::{MessageStore, StorageError};
use courier_types::envelope::MessageKind;
use courier_types::message::{Message, UserId};
use courier_types::rpc::UserEntry;

use crate::presence::PresenceDirectory;
use crate::redelivery;
use crate::transport::AccessTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Delivery,
    Storage,
}

/// A message travelling through the dispatch queue with its remaining retry
/// budget. Lives only in the queue's transient retry path; never persisted.
#[derive(Debug, Clone)]
pub struct RetryEnvelope {
    pub message: Message,
    pub attempts_left: u32,
    pub reason: Option<RetryReason>,
    /// True when the message already has a storage row (redelivery path);
    /// such messages are marked delivered instead of stored a second time.
    pub persisted: bool,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Capacity of the inbound channel.
    pub queue_buffer: usize,
    /// Retry budget per message for transient storage failures.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub retry_base: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_buffer: 100,
            max_attempts: 5,
            retry_base: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("dispatch queue is shut down")]
    ShuttingDown,
}

/// Cloneable front door to a running dispatch queue.
#[derive(Clone)]
pub struct DispatchHandle {
    inbound: mpsc::Sender<RetryEnvelope>,
    offline: mpsc::Sender<UserEntry>,
    shutdown: mpsc::Sender<()>,
    max_attempts: u32,
    fatal_deliveries: Arc<AtomicU64>,
}

impl DispatchHandle {
    /// Accept a freshly received message for routing.
    pub async fn submit(&self, message: Message) -> Result<(), SubmitError> {
        self.inbound
            .send(RetryEnvelope {
                message,
                attempts_left: self.max_attempts,
                reason: None,
                persisted: false,
            })
            .await
            .map_err(|_| SubmitError::ShuttingDown)
    }

    /// Schedule offline redelivery for a user who just logged in.
    pub async fn submit_offline(&self, entry: UserEntry) -> Result<(), SubmitError> {
        self.offline
            .send(entry)
            .await
            .map_err(|_| SubmitError::ShuttingDown)
    }

    /// Stop the consumer. In-flight processing completes; no new dequeues
    /// occur and further submissions fail.
    pub fn shutdown(&self) {
        let _ = self.shutdown.try_send(());
    }

    /// Messages dropped after their retry budget ran out; monitored for
    /// operational alerting.
    pub fn fatal_deliveries(&self) -> u64 {
        self.fatal_deliveries.load(Ordering::Relaxed)
    }
}

/// The central routing decision point: one consumer task multiplexing live
/// inbound messages, offline-redelivery requests and the shutdown signal.
pub struct DispatchQueue<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    presence: Arc<PresenceDirectory>,
    config: DispatchConfig,
}

impl<S, T> DispatchQueue<S, T>
where
    S: MessageStore + 'static,
    T: AccessTransport,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        presence: Arc<PresenceDirectory>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            transport,
            presence,
            config,
        }
    }

    /// Start the consumer task. A queue is not restartable after shutdown;
    /// construct a fresh one to resume.
    pub fn start(self) -> (DispatchHandle, JoinHandle<()>) {
        let (inbound_tx, mut inbound_rx) = mpsc::channel(self.config.queue_buffer);
        let (offline_tx, mut offline_rx) = mpsc::channel(self.config.queue_buffer);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let fatal_deliveries = Arc::new(AtomicU64::new(0));

        let handle = DispatchHandle {
            inbound: inbound_tx.clone(),
            offline: offline_tx,
            shutdown: shutdown_tx,
            max_attempts: self.config.max_attempts,
            fatal_deliveries: fatal_deliveries.clone(),
        };

        let retry_tx = inbound_tx;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(envelope) = inbound_rx.recv() => {
                        self.process(envelope, &retry_tx, &fatal_deliveries).await;
                    }
                    Some(entry) = offline_rx.recv() => {
                        let _ = redelivery::spawn(
                            self.store.clone(),
                            entry,
                            retry_tx.clone(),
                            self.config.max_attempts,
                        );
                    }
                    _ = shutdown_rx.recv() => {
                        info!("dispatch: shutting down");
                        inbound_rx.close();
                        offline_rx.close();
                        break;
                    }
                    else => break,
                }
            }
        });

        (handle, task)
    }

    async fn process(
        &self,
        envelope: RetryEnvelope,
        retry_tx: &mpsc::Sender<RetryEnvelope>,
        fatal: &Arc<AtomicU64>,
    ) {
        if !envelope.message.kind.is_chat() {
            debug!(
                "dispatch: ignoring {} message {}",
                envelope.message.kind, envelope.message.id
            );
            return;
        }

        match envelope.message.recipient.clone() {
            Some(recipient) => self.route(envelope, recipient, retry_tx, fatal).await,
            None if envelope.message.kind == MessageKind::PushPlainText => {
                self.fan_out(&envelope.message).await;
            }
            None => {
                warn!(
                    "dispatch: dropping {} message {} with no recipient",
                    envelope.message.kind, envelope.message.id
                );
            }
        }
    }

    async fn route(
        &self,
        mut envelope: RetryEnvelope,
        recipient: UserId,
        retry_tx: &mpsc::Sender<RetryEnvelope>,
        fatal: &Arc<AtomicU64>,
    ) {
        if let Some(addr) = self.presence.lookup(&recipient) {
            match self
                .transport
                .push(&addr, Some(&recipient), &envelope.message)
                .await
            {
                Ok(()) => {
                    debug!(
                        "dispatch: delivered {} to {} at {}",
                        envelope.message.id, recipient, addr
                    );
                    if envelope.persisted {
                        self.mark_delivered(envelope.message.id).await;
                    }
                    return;
                }
                Err(e) => {
                    // Not a failure of the message: it takes the store path.
                    debug!(
                        "dispatch: live delivery of {} to {} failed: {}",
                        envelope.message.id, recipient, e
                    );
                    envelope.reason = Some(RetryReason::Delivery);
                }
            }
        }

        if envelope.persisted {
            // Already pending in storage; it rides the next reconnect.
            return;
        }

        self.persist(envelope, retry_tx, fatal).await;
    }

    async fn persist(
        &self,
        envelope: RetryEnvelope,
        retry_tx: &mpsc::Sender<RetryEnvelope>,
        fatal: &Arc<AtomicU64>,
    ) {
        let store = self.store.clone();
        let message = envelope.message.clone();
        let result = match tokio::task::spawn_blocking(move || store.store_message(&message)).await
        {
            Ok(result) => result,
            Err(e) => {
                error!("dispatch: storage task panicked: {}", e);
                return;
            }
        };

        match result {
            Ok(()) => {
                debug!("dispatch: stored {} as pending", envelope.message.id);
            }
            Err(e) => {
                self.schedule_retry(envelope, RetryReason::Storage, e, retry_tx, fatal);
            }
        }
    }

    /// Bounded retry with exponential backoff; the timer runs off the
    /// consumer task so a sleeping retry never stalls fresh traffic.
    fn schedule_retry(
        &self,
        mut envelope: RetryEnvelope,
        reason: RetryReason,
        cause: StorageError,
        retry_tx: &mpsc::Sender<RetryEnvelope>,
        fatal: &Arc<AtomicU64>,
    ) {
        if envelope.attempts_left == 0 {
            fatal.fetch_add(1, Ordering::Relaxed);
            error!(
                "dispatch: giving up on message {} after {} retries: {}",
                envelope.message.id, self.config.max_attempts, cause
            );
            return;
        }

        let used = self.config.max_attempts - envelope.attempts_left;
        let delay = self.config.retry_base * 2u32.saturating_pow(used);
        envelope.attempts_left -= 1;
        envelope.reason = Some(reason);

        warn!(
            "dispatch: storing {} failed ({}), retrying in {:?}",
            envelope.message.id, cause, delay
        );

        let retry_tx = retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry_tx.send(envelope).await.is_err() {
                debug!("dispatch: queue closed before retry could be resubmitted");
            }
        });
    }

    async fn mark_delivered(&self, id: Uuid) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.mark_delivered(id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // Left pending: the worst case is a duplicate redelivery,
                // which at-least-once allows.
                warn!("dispatch: marking {} delivered failed: {}", id, e);
            }
            Err(e) => error!("dispatch: storage task panicked: {}", e),
        }
    }

    /// Recipient-less push: fan out to every access node currently serving
    /// anyone. Best-effort; never persisted.
    async fn fan_out(&self, message: &Message) {
        let addrs = self.presence.addresses();
        debug!(
            "dispatch: broadcasting {} to {} access nodes",
            message.id,
            addrs.len()
        );
        for addr in addrs {
            if let Err(e) = self.transport.push(&addr, None, message).await {
                warn!("dispatch: broadcast push to {} failed: {}", addr, e);
            }
        }
    }
}
