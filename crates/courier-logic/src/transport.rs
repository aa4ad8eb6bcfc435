use async_trait::async_trait;

use courier_rpc::{ClientPool, RpcError};
use courier_types::message::{Message, UserId};
use courier_types::rpc::{
    Ack, KeepAliveRequest, KeepAliveResponse, PushRequest, ACCESS_PING, ACCESS_PUSH,
};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("push not acknowledged")]
    NotAcknowledged,
}

/// Delivery seam between the dispatch queue and the access tier.
#[async_trait]
pub trait AccessTransport: Send + Sync + 'static {
    /// Deliver to a user connected at `addr`; `user` unset means broadcast
    /// to every connection on that node.
    async fn push(
        &self,
        addr: &str,
        user: Option<&UserId>,
        message: &Message,
    ) -> Result<(), DeliveryError>;

    /// Liveness probe against an access node.
    async fn ping(&self, addr: &str) -> Result<(), DeliveryError>;
}

/// Production transport: pooled RPC clients, one per access-node address.
pub struct RpcAccessTransport {
    pool: ClientPool,
}

impl RpcAccessTransport {
    pub fn new(pool: ClientPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessTransport for RpcAccessTransport {
    async fn push(
        &self,
        addr: &str,
        user: Option<&UserId>,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        let client = self.pool.get(addr).await?;
        let request = PushRequest {
            user: user.cloned(),
            message: message.clone(),
        };
        let ack: Ack = client.call(ACCESS_PUSH, &request).await?;
        if !ack.ok {
            return Err(DeliveryError::NotAcknowledged);
        }
        Ok(())
    }

    async fn ping(&self, addr: &str) -> Result<(), DeliveryError> {
        let client = self.pool.get(addr).await?;
        let request = KeepAliveRequest {
            from: "logic".into(),
        };
        let pong: KeepAliveResponse = client.call(ACCESS_PING, &request).await?;
        if !pong.ok {
            return Err(DeliveryError::NotAcknowledged);
        }
        Ok(())
    }
}
