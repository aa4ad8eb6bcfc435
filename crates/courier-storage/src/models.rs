//! Database row types — these map directly to SQLite rows.
//! Distinct from the courier-types message model to keep the storage layer
//! independent of wire concerns.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::message::{DeliveryStatus, Message, UserId};

use crate::StorageError;

pub struct MessageRow {
    pub id: String,
    pub kind: String,
    pub sender: String,
    pub recipient: String,
    pub version: i64,
    pub content: Vec<u8>,
    pub status: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message, StorageError> {
        let id: Uuid = self
            .id
            .parse()
            .map_err(|_| StorageError::CorruptRow(format!("message id '{}'", self.id)))?;
        let kind = self
            .kind
            .parse()
            .map_err(|_| StorageError::CorruptRow(format!("kind '{}' on message '{}'", self.kind, self.id)))?;
        let status = match self.status.as_str() {
            "pending" => DeliveryStatus::Pending,
            "delivered" => DeliveryStatus::Delivered,
            other => {
                return Err(StorageError::CorruptRow(format!(
                    "status '{}' on message '{}'",
                    other, self.id
                )));
            }
        };
        let created_at = parse_timestamp(&self.created_at)
            .ok_or_else(|| StorageError::CorruptRow(format!("created_at '{}' on message '{}'", self.created_at, self.id)))?;

        Ok(Message {
            id,
            kind,
            sender: UserId::new(self.sender),
            recipient: Some(UserId::new(self.recipient)),
            version: self.version as u32,
            content: self.content,
            created_at,
            status,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        // SQLite's own datetime('now') default stores "YYYY-MM-DD HH:MM:SS"
        // without a timezone. Parse as naive UTC and convert.
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map(|ndt| ndt.and_utc())
            .ok()
    })
}
