pub mod migrations;
pub mod snapshot;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use zephyr_types::models::{DEFAULT_AVATAR, MessageRecord, UserRecord};

use crate::snapshot::Snapshot;
use crate::worker::PersistJob;

/// Everything the store knows at startup, regardless of which backend
/// produced it.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub users: Vec<UserRecord>,
    /// Ordered by timestamp; arrival order is not recoverable on reload.
    pub messages: Vec<MessageRecord>,
}

/// Primary store: one row per user, one row per message.
struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Primary store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {e}"))?;
        f(&mut conn)
    }

    fn load_all(&self) -> Result<LoadedState> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, profile_picture, friends, pending_requests FROM users
                 ORDER BY username",
            )?;
            let users = stmt
                .query_map([], |row| {
                    Ok(UserRecord {
                        username: row.get(0)?,
                        profile_picture: row.get(1)?,
                        friends: decode_names(&row.get::<_, String>(2)?),
                        pending_requests: decode_names(&row.get::<_, String>(3)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Timestamps order reloads; the row id breaks same-millisecond ties.
            let mut stmt = conn.prepare(
                "SELECT conversation_key, sender, text, timestamp, avatar_reference
                 FROM messages
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let messages = stmt
                .query_map([], |row| {
                    Ok(MessageRecord {
                        conversation_key: row.get(0)?,
                        sender: row.get(1)?,
                        text: row.get(2)?,
                        timestamp: row.get(3)?,
                        avatar_reference: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(LoadedState { users, messages })
        })
    }

    fn upsert_user(&self, record: &UserRecord) -> Result<()> {
        let friends = serde_json::to_string(&record.friends)?;
        let pending = serde_json::to_string(&record.pending_requests)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, profile_picture, friends, pending_requests)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(username) DO UPDATE SET
                     profile_picture = excluded.profile_picture,
                     friends = excluded.friends,
                     pending_requests = excluded.pending_requests",
                rusqlite::params![record.username, record.profile_picture, friends, pending],
            )?;
            Ok(())
        })
    }

    fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_key, sender, text, timestamp, avatar_reference)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.conversation_key,
                    record.sender,
                    record.text,
                    record.timestamp,
                    record.avatar_reference
                ],
            )?;
            Ok(())
        })
    }

    fn delete_messages_for_conversation(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE conversation_key = ?1", [key])?;
            Ok(())
        })
    }

    /// Write a full snapshot into the primary store: upsert every user's
    /// relation sets (without clobbering their stored avatar) and rewrite
    /// each conversation wholesale so reloads never see duplicates.
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let mut usernames: Vec<&String> = snapshot.friendships.keys().collect();
            for name in snapshot.pending_friend_requests.keys() {
                if !snapshot.friendships.contains_key(name) {
                    usernames.push(name);
                }
            }
            for username in usernames {
                let friends = snapshot
                    .friendships
                    .get(username)
                    .map(|f| serde_json::to_string(f))
                    .transpose()?
                    .unwrap_or_else(|| "[]".to_string());
                let pending = snapshot
                    .pending_friend_requests
                    .get(username)
                    .map(|p| serde_json::to_string(p))
                    .transpose()?
                    .unwrap_or_else(|| "[]".to_string());
                tx.execute(
                    "INSERT INTO users (username, profile_picture, friends, pending_requests)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(username) DO UPDATE SET
                         friends = excluded.friends,
                         pending_requests = excluded.pending_requests",
                    rusqlite::params![username, DEFAULT_AVATAR, friends, pending],
                )?;
            }

            for (key, thread) in &snapshot.conversations {
                tx.execute("DELETE FROM messages WHERE conversation_key = ?1", [key])?;
                for msg in thread {
                    tx.execute(
                        "INSERT INTO messages
                             (conversation_key, sender, text, timestamp, avatar_reference)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![
                            key,
                            msg.sender,
                            msg.text,
                            msg.timestamp,
                            msg.avatar_reference
                        ],
                    )?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }
}

fn decode_names(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!("Corrupt name list '{raw}': {err}");
        Vec::new()
    })
}

/// Best-effort persistence over the primary store, degrading to a JSON
/// snapshot file when the store cannot be opened or written. Failures are
/// logged and never surfaced to clients; the in-memory state stays
/// authoritative for the running process.
pub struct Gateway {
    db: Option<Database>,
    snapshot_path: PathBuf,
}

impl Gateway {
    pub fn open(db_path: &Path, snapshot_path: &Path) -> Self {
        let db = match Database::open(db_path) {
            Ok(db) => Some(db),
            Err(err) => {
                warn!(
                    "Primary store unavailable ({err:#}); falling back to snapshot file {}",
                    snapshot_path.display()
                );
                None
            }
        };
        Self {
            db,
            snapshot_path: snapshot_path.to_path_buf(),
        }
    }

    /// True when row-level writes reach a primary store. Without one,
    /// callers persist full snapshots instead (fallback write-through).
    pub fn has_primary(&self) -> bool {
        self.db.is_some()
    }

    /// Best-effort load: primary store when available, else the snapshot
    /// file, else empty state.
    pub fn load_all(&self) -> LoadedState {
        if let Some(db) = &self.db {
            match db.load_all() {
                Ok(state) => {
                    info!(
                        users = state.users.len(),
                        messages = state.messages.len(),
                        "State loaded from primary store"
                    );
                    return state;
                }
                Err(err) => warn!("Loading from primary store failed: {err:#}"),
            }
        }

        match snapshot::read(&self.snapshot_path) {
            Ok(Some(snap)) => {
                info!("State loaded from snapshot file");
                snap.into_loaded_state()
            }
            Ok(None) => LoadedState::default(),
            Err(err) => {
                warn!("Reading snapshot file failed: {err:#}");
                LoadedState::default()
            }
        }
    }

    pub fn upsert_user(&self, record: &UserRecord) -> Result<()> {
        match &self.db {
            Some(db) => db.upsert_user(record),
            None => {
                debug!("No primary store; user row write skipped");
                Ok(())
            }
        }
    }

    pub fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        match &self.db {
            Some(db) => db.insert_message(record),
            None => {
                debug!("No primary store; message row write skipped");
                Ok(())
            }
        }
    }

    pub fn delete_messages_for_conversation(&self, key: &str) -> Result<()> {
        match &self.db {
            Some(db) => db.delete_messages_for_conversation(key),
            None => Ok(()),
        }
    }

    /// Persist a full snapshot. A primary-store failure degrades to the
    /// snapshot file rather than losing the write entirely.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(db) = &self.db {
            match db.save_snapshot(snapshot) {
                Ok(()) => return Ok(()),
                Err(err) => warn!(
                    "Primary store snapshot failed ({err:#}); writing snapshot file instead"
                ),
            }
        }
        snapshot::write(&self.snapshot_path, snapshot)
    }

    pub(crate) fn apply(&self, job: PersistJob) -> Result<()> {
        match job {
            PersistJob::UpsertUser(record) => self.upsert_user(&record),
            PersistJob::InsertMessage(record) => self.insert_message(&record),
            PersistJob::Snapshot(snapshot) => self.save_snapshot(&snapshot),
            // handled on the worker loop, never reaches the store
            PersistJob::Flush(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zephyr_types::models::StoredMessage;

    fn user(username: &str, friends: &[&str], pending: &[&str]) -> UserRecord {
        UserRecord {
            username: username.to_string(),
            profile_picture: format!("{username}.png"),
            friends: friends.iter().map(|s| s.to_string()).collect(),
            pending_requests: pending.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn message(key: &str, sender: &str, text: &str, timestamp: i64) -> MessageRecord {
        MessageRecord {
            conversation_key: key.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp,
            avatar_reference: format!("{sender}.png"),
        }
    }

    #[test]
    fn primary_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("relay.db");
        let snap_path = dir.path().join("snapshot.json");

        {
            let gateway = Gateway::open(&db_path, &snap_path);
            assert!(gateway.has_primary());
            gateway.upsert_user(&user("alice", &["bob"], &[])).unwrap();
            gateway.upsert_user(&user("bob", &["alice"], &[])).unwrap();
            gateway
                .insert_message(&message("alice:bob", "alice", "hi", 2_000))
                .unwrap();
            gateway
                .insert_message(&message("alice:bob", "bob", "hey", 1_000))
                .unwrap();
        }

        let gateway = Gateway::open(&db_path, &snap_path);
        let state = gateway.load_all();

        assert_eq!(state.users, vec![user("alice", &["bob"], &[]), user("bob", &["alice"], &[])]);
        // reload order is by timestamp, not insertion
        let texts: Vec<&str> = state.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["hey", "hi"]);
    }

    #[test]
    fn upsert_replaces_relation_sets() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::open(&dir.path().join("relay.db"), &dir.path().join("s.json"));

        gateway.upsert_user(&user("alice", &[], &["bob"])).unwrap();
        gateway.upsert_user(&user("alice", &["bob"], &[])).unwrap();

        let state = gateway.load_all();
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.users[0].friends, ["bob"]);
        assert!(state.users[0].pending_requests.is_empty());
    }

    #[test]
    fn delete_clears_one_conversation_only() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::open(&dir.path().join("relay.db"), &dir.path().join("s.json"));

        gateway
            .insert_message(&message("alice:bob", "alice", "hi", 1))
            .unwrap();
        gateway
            .insert_message(&message("alice:carol", "alice", "yo", 2))
            .unwrap();
        gateway.delete_messages_for_conversation("alice:bob").unwrap();

        let state = gateway.load_all();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].conversation_key, "alice:carol");
    }

    #[test]
    fn snapshot_rewrite_deduplicates_messages() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::open(&dir.path().join("relay.db"), &dir.path().join("s.json"));

        gateway
            .insert_message(&message("alice:bob", "alice", "hi", 1))
            .unwrap();

        let mut snap = Snapshot::default();
        snap.friendships.insert("alice".into(), vec!["bob".into()]);
        snap.conversations.insert(
            "alice:bob".into(),
            vec![StoredMessage {
                sender: "alice".into(),
                text: "hi".into(),
                timestamp: 1,
                avatar_reference: "alice.png".into(),
            }],
        );

        // saving the same snapshot twice must not duplicate rows
        gateway.save_snapshot(&snap).unwrap();
        gateway.save_snapshot(&snap).unwrap();

        let state = gateway.load_all();
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn snapshot_save_preserves_stored_avatars() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::open(&dir.path().join("relay.db"), &dir.path().join("s.json"));

        gateway.upsert_user(&user("alice", &[], &[])).unwrap();

        let mut snap = Snapshot::default();
        snap.friendships.insert("alice".into(), vec!["bob".into()]);
        snap.pending_friend_requests
            .insert("bob".into(), vec![]);
        gateway.save_snapshot(&snap).unwrap();

        let state = gateway.load_all();
        let alice = state.users.iter().find(|u| u.username == "alice").unwrap();
        assert_eq!(alice.profile_picture, "alice.png");
        assert_eq!(alice.friends, ["bob"]);
        // never-registered request target gets the placeholder
        let bob = state.users.iter().find(|u| u.username == "bob").unwrap();
        assert_eq!(bob.profile_picture, DEFAULT_AVATAR);
    }

    #[test]
    fn degrades_to_snapshot_file_when_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // a directory path is not a valid database file
        let bad_db = dir.path().to_path_buf();
        let snap_path = dir.path().join("snapshot.json");

        let gateway = Gateway::open(&bad_db, &snap_path);
        assert!(!gateway.has_primary());

        let mut snap = Snapshot::default();
        snap.friendships.insert("alice".into(), vec![]);
        gateway.save_snapshot(&snap).unwrap();

        let state = Gateway::open(&bad_db, &snap_path).load_all();
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.users[0].username, "alice");
    }
}
