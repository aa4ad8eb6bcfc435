pub mod envelope;
pub mod message;
pub mod rpc;

pub use envelope::{ChatPayload, DecodeError, Envelope, MessageKind};
pub use message::{DeliveryStatus, Message, UserId};

/// Current wire protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u32 = 1;
