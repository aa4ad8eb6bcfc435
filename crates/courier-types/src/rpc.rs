//! Payload types for the node-to-node RPC surface.

use serde::{Deserialize, Serialize};

use crate::message::{Message, UserId};

// Method strings on the wire.
pub const LOGIC_ADD: &str = "LogicRPC.Add";
pub const LOGIC_LOGOUT: &str = "LogicRPC.LogoutHandle";
pub const USER_LOGIN: &str = "UserHandler.LoginHandler";
pub const USER_LOGOUT: &str = "UserHandler.LogoutHandle";
pub const ACCESS_PING: &str = "AccessRPC.Ping";
pub const ACCESS_PUSH: &str = "AccessRPC.Push";

/// Presence registration: which access node currently serves a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub user_id: UserId,
    /// The access node's advertised RPC address.
    pub server_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub ok: bool,
}

/// Deliver a message to a user connected to the receiving access node.
/// With `user` unset, the message is broadcast to every local connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
