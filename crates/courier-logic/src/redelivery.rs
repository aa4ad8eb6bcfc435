//! Offline redelivery: when a user reconnects, drain their persisted
//! undelivered messages and resubmit each through the dispatch queue as if
//! newly received, in creation order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use courier_storage::MessageStore;
use courier_types::rpc::UserEntry;

use crate::dispatch::RetryEnvelope;

/// Fetch and resubmit on a separate task, so the queue consumer never blocks
/// on pushing into its own inbound channel.
pub(crate) fn spawn<S: MessageStore + 'static>(
    store: Arc<S>,
    entry: UserEntry,
    inbound: mpsc::Sender<RetryEnvelope>,
    max_attempts: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let user = entry.user_id;

        let fetch_store = store.clone();
        let fetch_user = user.clone();
        let pending =
            match tokio::task::spawn_blocking(move || fetch_store.fetch_pending(&fetch_user)).await
            {
                Ok(Ok(pending)) => pending,
                Ok(Err(e)) => {
                    // Best-effort: the login itself already succeeded.
                    error!("redelivery: fetching pending messages for {} failed: {}", user, e);
                    return;
                }
                Err(e) => {
                    error!("redelivery: storage task panicked: {}", e);
                    return;
                }
            };

        if pending.is_empty() {
            // The common case.
            debug!("redelivery: nothing pending for {}", user);
            return;
        }

        info!(
            "redelivery: resubmitting {} messages for {}",
            pending.len(),
            user
        );
        for message in pending {
            let envelope = RetryEnvelope {
                message,
                attempts_left: max_attempts,
                reason: None,
                persisted: true,
            };
            if inbound.send(envelope).await.is_err() {
                debug!("redelivery: queue closed, aborting");
                return;
            }
        }
    })
}
