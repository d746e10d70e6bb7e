//! In-memory mirror of the `user` table, primed once at startup and kept
//! current by the registration path. A single `RwLock` guards both reads
//! and writes, so a login lookup racing a concurrent registration can
//! never observe a table mid-insert.

use std::collections::HashMap;
use std::sync::RwLock;

/// Username/password table, shared by every worker.
#[derive(Debug, Default)]
pub struct UserTable {
    inner: RwLock<HashMap<String, String>>,
}

impl UserTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `(username, passwd)` pair, as read by the startup
    /// priming query (`SELECT username,passwd FROM user`).
    pub fn load(&self, rows: impl IntoIterator<Item = (String, String)>) {
        let mut guard = self.inner.write().expect("user table lock poisoned");
        guard.extend(rows);
    }

    /// `true` if `password` matches the stored password for `username`.
    /// `false` both when the user is unknown and when the password does
    /// not match, so callers cannot distinguish the two from the return
    /// value alone.
    pub fn check_login(&self, username: &str, password: &str) -> bool {
        let guard = self.inner.read().expect("user table lock poisoned");
        guard.get(username).map(|p| p == password).unwrap_or(false)
    }

    /// `true` if `username` is already registered.
    pub fn contains(&self, username: &str) -> bool {
        let guard = self.inner.read().expect("user table lock poisoned");
        guard.contains_key(username)
    }

    /// Adds a freshly registered user. Callers must have already persisted
    /// the row to the database; this only updates the in-memory mirror.
    pub fn insert(&self, username: String, password: String) {
        let mut guard = self.inner.write().expect("user table lock poisoned");
        guard.insert(username, password);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_user_fails_login() {
        let table = UserTable::new();
        assert!(!table.check_login("alice", "pw"));
    }

    #[test]
    fn loaded_user_can_log_in_with_correct_password() {
        let table = UserTable::new();
        table.load([("alice".to_string(), "pw!".to_string())]);
        assert!(table.check_login("alice", "pw!"));
        assert!(!table.check_login("alice", "wrong"));
    }

    #[test]
    fn insert_makes_user_known_immediately() {
        let table = UserTable::new();
        assert!(!table.contains("bob"));
        table.insert("bob".to_string(), "hunter2".to_string());
        assert!(table.contains("bob"));
        assert!(table.check_login("bob", "hunter2"));
    }
}
