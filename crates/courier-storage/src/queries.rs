use rusqlite::params;
use tracing::warn;
use uuid::Uuid;

use courier_types::message::{Message, UserId};

use crate::models::MessageRow;
use crate::{Database, MessageStore, StorageError};

impl MessageStore for Database {
    fn store_message(&self, message: &Message) -> Result<(), StorageError> {
        let recipient = message
            .recipient
            .as_ref()
            .ok_or(StorageError::NoRecipient(message.id))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, kind, sender, recipient, version, content, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id.to_string(),
                    message.kind.as_str(),
                    message.sender.as_str(),
                    recipient.as_str(),
                    message.version,
                    message.content,
                    message.status.as_str(),
                    message.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn fetch_pending(&self, user: &UserId) -> Result<Vec<Message>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, sender, recipient, version, content, status, created_at
                 FROM messages
                 WHERE recipient = ?1 AND status = 'pending'
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([user.as_str()], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        sender: row.get(2)?,
                        recipient: row.get(3)?,
                        version: row.get(4)?,
                        content: row.get(5)?,
                        status: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn mark_delivered(&self, id: Uuid) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'delivered' WHERE id = ?1",
                [id.to_string()],
            )?;
            if changed == 0 {
                warn!("mark_delivered: no such message {}", id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::envelope::{ChatPayload, Envelope, MessageKind};
    use courier_types::message::DeliveryStatus;

    fn chat(from: &str, to: &str, body: &str) -> Message {
        let payload = ChatPayload {
            from: UserId::from(from),
            to: Some(UserId::from(to)),
            body: body.into(),
        };
        let env = Envelope::chat(MessageKind::PlainText, &payload).unwrap();
        Message::from_envelope(&env).unwrap()
    }

    #[test]
    fn test_store_then_fetch_pending() {
        let db = Database::open_in_memory().unwrap();

        let m1 = chat("alice", "bob", "first");
        let m2 = chat("alice", "bob", "second");
        db.store_message(&m1).unwrap();
        db.store_message(&m2).unwrap();

        let pending = db.fetch_pending(&UserId::from("bob")).unwrap();
        assert_eq!(pending.len(), 2);
        // Creation order.
        assert_eq!(pending[0].id, m1.id);
        assert_eq!(pending[1].id, m2.id);
        assert_eq!(pending[0].status, DeliveryStatus::Pending);
        assert_eq!(pending[0].payload().unwrap().body, "first");

        // Nothing pending for the sender.
        assert!(db.fetch_pending(&UserId::from("alice")).unwrap().is_empty());
    }

    #[test]
    fn test_mark_delivered_removes_from_pending() {
        let db = Database::open_in_memory().unwrap();

        let msg = chat("alice", "bob", "hi");
        db.store_message(&msg).unwrap();
        db.mark_delivered(msg.id).unwrap();

        assert!(db.fetch_pending(&UserId::from("bob")).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_pending_empty_is_not_an_error() {
        let db = Database::open_in_memory().unwrap();
        let pending = db.fetch_pending(&UserId::from("nobody")).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_store_rejects_broadcast_messages() {
        let db = Database::open_in_memory().unwrap();

        let mut msg = chat("alice", "bob", "to everyone");
        msg.recipient = None;
        assert!(matches!(
            db.store_message(&msg),
            Err(StorageError::NoRecipient(_))
        ));
    }
}
