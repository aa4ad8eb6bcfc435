use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use courier_types::message::UserId;

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub user: UserId,
    pub access_addr: String,
    pub since: DateTime<Utc>,
}

/// The single source of truth for "is this user reachable, and where".
///
/// One lock, O(1) map operations, nothing held across I/O. Last write wins
/// when the same user logs in at two access nodes concurrently.
#[derive(Default)]
pub struct PresenceDirectory {
    inner: Mutex<HashMap<UserId, PresenceEntry>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register where a user is reachable. Returns the previous address when
    /// the user moved, so callers can log the takeover.
    pub fn set(&self, user: UserId, access_addr: String) -> Option<String> {
        let entry = PresenceEntry {
            user: user.clone(),
            access_addr,
            since: Utc::now(),
        };
        self.inner
            .lock()
            .expect("presence lock poisoned")
            .insert(user, entry)
            .map(|prev| prev.access_addr)
    }

    pub fn clear(&self, user: &UserId) -> bool {
        self.inner
            .lock()
            .expect("presence lock poisoned")
            .remove(user)
            .is_some()
    }

    pub fn lookup(&self, user: &UserId) -> Option<String> {
        self.inner
            .lock()
            .expect("presence lock poisoned")
            .get(user)
            .map(|entry| entry.access_addr.clone())
    }

    /// Distinct access-node addresses currently serving anyone; used for the
    /// push-to-all fan-out.
    pub fn addresses(&self) -> Vec<String> {
        let map = self.inner.lock().expect("presence lock poisoned");
        let mut addrs: Vec<String> = map.values().map(|e| e.access_addr.clone()).collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("presence lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let directory = PresenceDirectory::new();
        let user = UserId::from("alice");

        assert!(directory.set(user.clone(), "node-a:4100".into()).is_none());
        let prev = directory.set(user.clone(), "node-b:4100".into());
        assert_eq!(prev.as_deref(), Some("node-a:4100"));
        assert_eq!(directory.lookup(&user).as_deref(), Some("node-b:4100"));
    }

    #[test]
    fn test_clear_then_lookup_is_absent() {
        let directory = PresenceDirectory::new();
        let user = UserId::from("alice");

        directory.set(user.clone(), "node-a:4100".into());
        assert!(directory.clear(&user));
        assert!(directory.lookup(&user).is_none());
        assert!(!directory.clear(&user));
    }

    #[test]
    fn test_addresses_are_distinct() {
        let directory = PresenceDirectory::new();
        directory.set(UserId::from("a"), "node-a:4100".into());
        directory.set(UserId::from("b"), "node-a:4100".into());
        directory.set(UserId::from("c"), "node-b:4100".into());

        assert_eq!(directory.addresses(), vec!["node-a:4100", "node-b:4100"]);
    }
}
