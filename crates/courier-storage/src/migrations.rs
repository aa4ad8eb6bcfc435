use rusqlite::Connection;
use tracing::info;

use crate::StorageError;

pub fn run(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            kind        TEXT NOT NULL,
            sender      TEXT NOT NULL,
            recipient   TEXT NOT NULL,
            version     INTEGER NOT NULL,
            content     BLOB NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pending
            ON messages(recipient, status, created_at);
        ",
    )?;

    info!("Message store migrations complete");
    Ok(())
}
