//! Persisted registration table: `registrations(username primary key,
//! install_id, first_seen_at, last_seen_at)`. A thin synchronous wrapper
//! around `rusqlite`, called from async handlers via `spawn_blocking` since
//! the bundled sqlite3 driver has no async API.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub install_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

pub struct RegistrationStore {
    conn: Mutex<Connection>,
}

impl RegistrationStore {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS registrations (
                username TEXT PRIMARY KEY,
                install_id TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(RegistrationStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE registrations (
                username TEXT PRIMARY KEY,
                install_id TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(RegistrationStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn find(&self, username: &str) -> rusqlite::Result<Option<Registration>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT username, install_id, first_seen_at, last_seen_at
             FROM registrations WHERE username = ?1",
            params![username],
            |row| {
                Ok(Registration {
                    username: row.get(0)?,
                    install_id: row.get(1)?,
                    first_seen_at: row.get(2)?,
                    last_seen_at: row.get(3)?,
                })
            },
        )
        .optional()
    }

    /// Inserts a brand-new registration. Caller must have already checked no
    /// record exists for `username`.
    pub fn insert(&self, username: &str, install_id: &str, now: DateTime<Utc>) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO registrations (username, install_id, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![username, install_id, now],
        )?;
        Ok(())
    }

    pub fn bump_last_seen(&self, username: &str, now: DateTime<Utc>) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE registrations SET last_seen_at = ?2 WHERE username = ?1",
            params![username, now],
        )?;
        Ok(())
    }

    /// Deletes registrations idle longer than `reclaim_days`, skipping any
    /// username in `protected` (currently waiting or paired). Returns the
    /// number of rows removed.
    pub fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        protected: &[String],
    ) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let placeholders = protected
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let sql = if protected.is_empty() {
            "DELETE FROM registrations WHERE last_seen_at < ?1".to_string()
        } else {
            format!("DELETE FROM registrations WHERE last_seen_at < ?1 AND username NOT IN ({placeholders})")
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut rusqlite_params: Vec<&dyn rusqlite::ToSql> = vec![&cutoff];
        for username in protected {
            rusqlite_params.push(username);
        }
        let removed = stmt.execute(rusqlite_params.as_slice())?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn insert_then_find_round_trips() {
        let store = RegistrationStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.insert("alice", "u1", now).unwrap();
        let found = store.find("alice").unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.install_id, "u1");
    }

    #[test]
    fn find_missing_username_returns_none() {
        let store = RegistrationStore::open_in_memory().unwrap();
        assert!(store.find("nobody").unwrap().is_none());
    }

    #[test]
    fn reclaim_stale_skips_protected_usernames() {
        let store = RegistrationStore::open_in_memory().unwrap();
        let old = Utc::now() - Duration::days(60);
        store.insert("alice", "u1", old).unwrap();
        store.insert("bob", "u2", old).unwrap();

        let removed = store
            .reclaim_stale(Utc::now() - Duration::days(30), &["bob".to_string()])
            .unwrap();

        assert_eq!(removed, 1);
        assert!(store.find("alice").unwrap().is_none());
        assert!(store.find("bob").unwrap().is_some());
    }

    #[test]
    fn reclaim_stale_leaves_recently_seen_registrations() {
        let store = RegistrationStore::open_in_memory().unwrap();
        store.insert("alice", "u1", Utc::now()).unwrap();

        let removed = store
            .reclaim_stale(Utc::now() - Duration::days(30), &[])
            .unwrap();

        assert_eq!(removed, 0);
        assert!(store.find("alice").unwrap().is_some());
    }
}
