use std::collections::BTreeMap;

use zephyr_types::models::{MessageRecord, SELF_SENDER, StoredMessage};

/// Canonical key for the two-party thread between `a` and `b`. Both
/// directions produce the same key: the pair is sorted lexicographically
/// and joined with `:`.
pub fn conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// In-memory conversation threads keyed by canonical user pair, in arrival
/// order. Threads outlive friendships: removing a friend never deletes
/// history, and sending is not gated on friendship at all.
#[derive(Debug, Default)]
pub struct ConversationStore {
    threads: BTreeMap<String, Vec<StoredMessage>>,
}

impl ConversationStore {
    /// Rebuild threads from persisted records. Arrival order is lost
    /// across a reload, so timestamps break ties instead.
    pub fn seed(&mut self, records: Vec<MessageRecord>) {
        for record in records {
            self.threads
                .entry(record.conversation_key)
                .or_default()
                .push(StoredMessage {
                    sender: record.sender,
                    text: record.text,
                    timestamp: record.timestamp,
                    avatar_reference: record.avatar_reference,
                });
        }
        for thread in self.threads.values_mut() {
            thread.sort_by_key(|msg| msg.timestamp);
        }
    }

    /// Append a message to the pair's thread. Returns the canonical key
    /// and the stored message, for persistence and outbound events.
    pub fn append(
        &mut self,
        from: &str,
        to: &str,
        text: String,
        avatar_reference: String,
        timestamp: i64,
    ) -> (String, StoredMessage) {
        let key = conversation_key(from, to);
        let message = StoredMessage {
            sender: from.to_string(),
            text,
            timestamp,
            avatar_reference,
        };
        self.threads.entry(key.clone()).or_default().push(message.clone());
        (key, message)
    }

    /// Every thread involving `username`, keyed by the other participant,
    /// with the caller's own messages rewritten to the self marker so
    /// clients can render without any name-matching logic.
    pub fn history_for(&self, username: &str) -> BTreeMap<String, Vec<StoredMessage>> {
        let mut view = BTreeMap::new();
        for (key, thread) in &self.threads {
            let Some(other) = other_participant(key, username) else {
                continue;
            };
            let reshaped = thread
                .iter()
                .map(|msg| {
                    let mut msg = msg.clone();
                    if msg.sender == username {
                        msg.sender = SELF_SENDER.to_string();
                    }
                    msg
                })
                .collect();
            view.insert(other.to_string(), reshaped);
        }
        view
    }

    /// Thread map for the fallback snapshot document.
    pub fn snapshot_map(&self) -> BTreeMap<String, Vec<StoredMessage>> {
        self.threads.clone()
    }
}

fn other_participant<'a>(key: &'a str, username: &str) -> Option<&'a str> {
    let (a, b) = key.split_once(':')?;
    if a == username {
        Some(b)
    } else if b == username {
        Some(a)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_direction_independent() {
        assert_eq!(conversation_key("alice", "bob"), "alice:bob");
        assert_eq!(conversation_key("bob", "alice"), "alice:bob");
    }

    #[test]
    fn both_directions_append_to_one_thread() {
        let mut store = ConversationStore::default();
        store.append("alice", "bob", "hi".into(), "a.png".into(), 1);
        store.append("bob", "alice", "hey".into(), "b.png".into(), 2);

        let threads = store.snapshot_map();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads["alice:bob"].len(), 2);
    }

    #[test]
    fn history_rewrites_own_messages_to_the_self_marker() {
        let mut store = ConversationStore::default();
        store.append("alice", "bob", "hi".into(), "a.png".into(), 1);

        let for_alice = store.history_for("alice");
        assert_eq!(for_alice["bob"][0].sender, SELF_SENDER);

        let for_bob = store.history_for("bob");
        assert_eq!(for_bob["alice"][0].sender, "alice");
        assert_eq!(for_bob["alice"][0].text, "hi");
    }

    #[test]
    fn history_excludes_unrelated_threads() {
        let mut store = ConversationStore::default();
        store.append("alice", "bob", "hi".into(), "a.png".into(), 1);
        store.append("carol", "dave", "yo".into(), "c.png".into(), 2);

        let for_alice = store.history_for("alice");
        assert_eq!(for_alice.len(), 1);
        assert!(for_alice.contains_key("bob"));
    }

    #[test]
    fn exact_participant_match_only() {
        let mut store = ConversationStore::default();
        store.append("anne", "bob", "hi".into(), "a.png".into(), 1);

        // "ann" is a prefix of a participant but not a participant
        assert!(store.history_for("ann").is_empty());
    }

    #[test]
    fn seed_orders_by_timestamp() {
        let record = |sender: &str, text: &str, ts: i64| MessageRecord {
            conversation_key: "alice:bob".into(),
            sender: sender.into(),
            text: text.into(),
            timestamp: ts,
            avatar_reference: "x.png".into(),
        };

        let mut store = ConversationStore::default();
        store.seed(vec![
            record("bob", "second", 200),
            record("alice", "first", 100),
        ]);

        let thread = &store.snapshot_map()["alice:bob"];
        assert_eq!(thread[0].text, "first");
        assert_eq!(thread[1].text, "second");
    }
}
