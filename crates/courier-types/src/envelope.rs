use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// Kind of a wire envelope / routed message.
///
/// The string values are part of the wire protocol and round-trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Keepalive,
    PlainText,
    PushPlainText,
    Emotion,
    Login,
    Logout,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keepalive => "keepalive",
            Self::PlainText => "plain-text",
            Self::PushPlainText => "push-plain-text",
            Self::Emotion => "emotion",
            Self::Login => "login",
            Self::Logout => "logout",
        }
    }

    /// Kinds that carry a chat payload and are routed through the logic tier.
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::PlainText | Self::PushPlainText | Self::Emotion)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keepalive" => Ok(Self::Keepalive),
            "plain-text" => Ok(Self::PlainText),
            "push-plain-text" => Ok(Self::PushPlainText),
            "emotion" => Ok(Self::Emotion),
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One self-contained wire unit exchanged between a client and an access node.
///
/// `content` is opaque to the transport and decoded further per `kind`;
/// chat kinds carry a [`ChatPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub version: u32,
    #[serde(with = "base64_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
}

impl Envelope {
    /// Build a content-free envelope (keepalive, login, logout).
    pub fn control(kind: MessageKind, from: Option<UserId>) -> Self {
        Self {
            kind,
            version: crate::PROTOCOL_VERSION,
            content: Vec::new(),
            from,
            to: None,
        }
    }

    /// Build a chat envelope around a payload.
    pub fn chat(kind: MessageKind, payload: &ChatPayload) -> Result<Self, DecodeError> {
        Ok(Self {
            kind,
            version: crate::PROTOCOL_VERSION,
            content: serde_json::to_vec(payload)?,
            from: Some(payload.from.clone()),
            to: payload.to.clone(),
        })
    }

    /// Decode the chat payload carried by this envelope.
    pub fn chat_payload(&self) -> Result<ChatPayload, DecodeError> {
        if !self.kind.is_chat() {
            return Err(DecodeError::NotChat(self.kind));
        }
        Ok(serde_json::from_slice(&self.content)?)
    }
}

/// Chat payload carried inside `plain-text`, `emotion` and `push-plain-text`
/// envelopes. A missing `to` is only meaningful for `push-plain-text`, where
/// it means "every connected user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("{0} envelopes carry no chat payload")]
    NotChat(MessageKind),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opaque payload bytes ride JSON as base64.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        B64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_values() {
        for (kind, wire) in [
            (MessageKind::Keepalive, "\"keepalive\""),
            (MessageKind::PlainText, "\"plain-text\""),
            (MessageKind::PushPlainText, "\"push-plain-text\""),
            (MessageKind::Emotion, "\"emotion\""),
            (MessageKind::Login, "\"login\""),
            (MessageKind::Logout, "\"logout\""),
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), wire);
            assert_eq!(serde_json::from_str::<MessageKind>(wire).unwrap(), kind);
        }
    }

    #[test]
    fn test_envelope_round_trip() {
        let payload = ChatPayload {
            from: UserId::from("alice"),
            to: Some(UserId::from("bob")),
            body: "hi".into(),
        };
        let env = Envelope::chat(MessageKind::PlainText, &payload).unwrap();

        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();

        assert_eq!(back.kind, MessageKind::PlainText);
        assert_eq!(back.version, crate::PROTOCOL_VERSION);
        assert_eq!(back.from, Some(UserId::from("alice")));
        assert_eq!(back.chat_payload().unwrap(), payload);
    }

    #[test]
    fn test_control_envelope_has_no_payload() {
        let env = Envelope::control(MessageKind::Keepalive, None);
        assert!(env.content.is_empty());
        assert!(env.chat_payload().is_err());

        let json = serde_json::to_string(&env).unwrap();
        // Content-free envelopes omit the content field entirely.
        assert!(!json.contains("content"));
    }
}
