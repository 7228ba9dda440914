use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use zephyr_types::models::{DEFAULT_AVATAR, MessageRecord, StoredMessage, UserRecord};

use crate::LoadedState;

/// Full serialization of the in-memory relay state. This is also the exact
/// on-disk layout of the fallback file: three top-level maps, conversation
/// keys being the sorted `"userA:userB"` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub conversations: BTreeMap<String, Vec<StoredMessage>>,
    pub friendships: BTreeMap<String, Vec<String>>,
    #[serde(rename = "pendingFriendRequests")]
    pub pending_friend_requests: BTreeMap<String, Vec<String>>,
}

impl Snapshot {
    /// Reconstruct gateway records from the snapshot document. Users get
    /// the placeholder avatar: the fallback layout carries no profiles.
    pub fn into_loaded_state(self) -> LoadedState {
        let mut users: BTreeMap<String, UserRecord> = BTreeMap::new();
        for (username, friends) in self.friendships {
            users
                .entry(username.clone())
                .or_insert_with(|| empty_record(&username))
                .friends = friends;
        }
        for (username, pending) in self.pending_friend_requests {
            users
                .entry(username.clone())
                .or_insert_with(|| empty_record(&username))
                .pending_requests = pending;
        }

        let mut messages = Vec::new();
        for (conversation_key, thread) in self.conversations {
            for msg in thread {
                messages.push(MessageRecord {
                    conversation_key: conversation_key.clone(),
                    sender: msg.sender,
                    text: msg.text,
                    timestamp: msg.timestamp,
                    avatar_reference: msg.avatar_reference,
                });
            }
        }

        LoadedState {
            users: users.into_values().collect(),
            messages,
        }
    }
}

fn empty_record(username: &str) -> UserRecord {
    UserRecord {
        username: username.to_string(),
        profile_picture: DEFAULT_AVATAR.to_string(),
        friends: Vec::new(),
        pending_requests: Vec::new(),
    }
}

/// Read the snapshot document, if one has been written before.
pub fn read(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    Ok(Some(snapshot))
}

pub fn write(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json).with_context(|| format!("writing snapshot {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot
            .friendships
            .insert("alice".into(), vec!["bob".into()]);
        snapshot.friendships.insert("bob".into(), vec!["alice".into()]);
        snapshot
            .pending_friend_requests
            .insert("carol".into(), vec!["alice".into()]);
        snapshot.conversations.insert(
            "alice:bob".into(),
            vec![StoredMessage {
                sender: "alice".into(),
                text: "hi".into(),
                timestamp: 1_000,
                avatar_reference: "pic.png".into(),
            }],
        );
        snapshot
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        write(&path, &sample()).unwrap();
        let loaded = read(&path).unwrap().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn loaded_state_synthesizes_user_records() {
        let state = sample().into_loaded_state();

        let usernames: Vec<&str> = state.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(usernames, ["alice", "bob", "carol"]);

        let carol = state.users.iter().find(|u| u.username == "carol").unwrap();
        assert_eq!(carol.pending_requests, ["alice"]);
        assert_eq!(carol.profile_picture, DEFAULT_AVATAR);

        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].conversation_key, "alice:bob");
    }

    #[test]
    fn disk_layout_uses_fixed_field_names() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains(r#""conversations""#));
        assert!(json.contains(r#""friendships""#));
        assert!(json.contains(r#""pendingFriendRequests""#));
    }
}
