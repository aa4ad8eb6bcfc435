pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use courier_types::message::{Message, UserId};

/// Errors surfaced across the storage contract. Callers treat these as
/// transient and retry through the dispatch queue.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage lock poisoned")]
    LockPoisoned,
    #[error("message {0} has no recipient to store against")]
    NoRecipient(Uuid),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// The narrow contract the dispatch queue and redelivery worker consume.
///
/// All methods are blocking; async callers move them off the runtime with
/// `spawn_blocking`.
pub trait MessageStore: Send + Sync {
    fn store_message(&self, message: &Message) -> Result<(), StorageError>;
    /// Pending messages for a user in creation order. An empty vec, not an
    /// error, when none are pending.
    fn fetch_pending(&self, user: &UserId) -> Result<Vec<Message>, StorageError>;
    fn mark_delivered(&self, id: Uuid) -> Result<(), StorageError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Message store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&conn)
    }
}
