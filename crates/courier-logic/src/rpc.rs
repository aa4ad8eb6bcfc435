use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use courier_rpc::{RpcError, Service};
use courier_types::message::Message;
use courier_types::rpc::{Ack, UserEntry, LOGIC_ADD, LOGIC_LOGOUT, USER_LOGIN, USER_LOGOUT};

use crate::dispatch::DispatchHandle;
use crate::presence::PresenceDirectory;

/// The RPC surface access nodes call into the logic tier.
pub struct LogicService {
    presence: Arc<PresenceDirectory>,
    dispatch: DispatchHandle,
}

impl LogicService {
    pub fn new(presence: Arc<PresenceDirectory>, dispatch: DispatchHandle) -> Self {
        Self { presence, dispatch }
    }
}

#[async_trait]
impl Service for LogicService {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            LOGIC_ADD => {
                let message: Message = serde_json::from_value(params)?;
                self.dispatch
                    .submit(message)
                    .await
                    .map_err(|e| RpcError::Remote(e.to_string()))?;
                Ok(serde_json::to_value(Ack::ok())?)
            }
            USER_LOGIN => {
                let entry: UserEntry = serde_json::from_value(params)?;
                if let Some(prev) = self
                    .presence
                    .set(entry.user_id.clone(), entry.server_ip.clone())
                {
                    if prev != entry.server_ip {
                        info!(
                            "presence: {} moved from {} to {}",
                            entry.user_id, prev, entry.server_ip
                        );
                    }
                }
                // Redelivery is best-effort and never fails the login.
                if let Err(e) = self.dispatch.submit_offline(entry.clone()).await {
                    warn!(
                        "login: offline redelivery for {} not scheduled: {}",
                        entry.user_id, e
                    );
                }
                Ok(serde_json::to_value(Ack::ok())?)
            }
            LOGIC_LOGOUT | USER_LOGOUT => {
                let entry: UserEntry = serde_json::from_value(params)?;
                self.presence.clear(&entry.user_id);
                Ok(serde_json::to_value(Ack::ok())?)
            }
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}
