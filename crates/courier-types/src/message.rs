use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{ChatPayload, DecodeError, Envelope, MessageKind};

/// Opaque key identifying a user across the whole system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }
}

/// A routed chat message as the logic tier sees it.
///
/// `recipient` is absent only for the push-to-all primitive; routed messages
/// always carry one. The core never deletes a message, it only flips
/// `status` from pending to delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub kind: MessageKind,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserId>,
    pub version: u32,
    #[serde(with = "crate::envelope::base64_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl Message {
    /// Lift an inbound chat envelope into a routable message.
    pub fn from_envelope(env: &Envelope) -> Result<Self, DecodeError> {
        let payload = env.chat_payload()?;
        Ok(Self {
            id: Uuid::new_v4(),
            kind: env.kind,
            sender: payload.from,
            recipient: payload.to,
            version: env.version,
            content: env.content.clone(),
            created_at: Utc::now(),
            status: DeliveryStatus::Pending,
        })
    }

    /// Rebuild the wire envelope delivered to the recipient's client.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            kind: self.kind,
            version: self.version,
            content: self.content.clone(),
            from: Some(self.sender.clone()),
            to: self.recipient.clone(),
        }
    }

    /// The chat payload carried by this message.
    pub fn payload(&self) -> Result<ChatPayload, DecodeError> {
        self.to_envelope().chat_payload()
    }
}
