use std::collections::{BTreeMap, BTreeSet};

use zephyr_types::models::{DEFAULT_AVATAR, UserRecord};

/// Outcome of a friendship proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposeOutcome {
    /// A new pending entry was recorded on the target.
    Requested,
    /// An opposite-direction request was already waiting; both were
    /// resolved straight into a friendship.
    AutoAccepted,
    /// Already friends, or an identical request is still pending.
    AlreadyRelated,
}

#[derive(Debug, Clone)]
struct UserEntry {
    /// Set once the user completes a registration (or is loaded from the
    /// store). Entries created as mere request targets stay unregistered
    /// and do not reserve the name.
    registered: bool,
    profile_picture: String,
    friends: BTreeSet<String>,
    /// Incoming requests: usernames that asked to befriend this user.
    pending: BTreeSet<String>,
}

impl Default for UserEntry {
    fn default() -> Self {
        Self {
            registered: false,
            profile_picture: DEFAULT_AVATAR.to_string(),
            friends: BTreeSet::new(),
            pending: BTreeSet::new(),
        }
    }
}

/// In-memory social graph: per-user friend and incoming-request sets.
/// Friendship is symmetric; every transition keeps both sides consistent.
/// Keys are exact usernames — the only case-insensitive operation is the
/// registration uniqueness check.
#[derive(Debug, Default)]
pub struct SocialGraph {
    users: BTreeMap<String, UserEntry>,
}

impl SocialGraph {
    /// Seed a user loaded from the store. Loaded users count as known for
    /// registration uniqueness.
    pub fn seed_record(&mut self, record: UserRecord) {
        let entry = self.users.entry(record.username).or_default();
        entry.registered = true;
        entry.profile_picture = record.profile_picture;
        entry.friends = record.friends.into_iter().collect();
        entry.pending = record.pending_requests.into_iter().collect();
    }

    /// Record a completed registration, updating the stored avatar.
    pub fn ensure_user(&mut self, username: &str, profile_picture: &str) {
        let entry = self.entry_mut(username);
        entry.registered = true;
        entry.profile_picture = profile_picture.to_string();
    }

    /// Registration uniqueness check: matches any user that ever
    /// registered, live or not, ignoring case.
    pub fn is_known(&self, username: &str) -> bool {
        let needle = username.to_lowercase();
        self.users
            .iter()
            .any(|(name, entry)| entry.registered && name.to_lowercase() == needle)
    }

    /// `from` proposes a friendship to `to`.
    pub fn propose(&mut self, from: &str, to: &str) -> ProposeOutcome {
        if self.has_pending(to, from) || self.are_friends(from, to) {
            return ProposeOutcome::AlreadyRelated;
        }
        if self.has_pending(from, to) {
            // the opposite request is already waiting on our side:
            // resolve both directly instead of stacking a second pending
            self.entry_mut(from).pending.remove(to);
            self.link(from, to);
            return ProposeOutcome::AutoAccepted;
        }
        self.entry_mut(to).pending.insert(from.to_string());
        ProposeOutcome::Requested
    }

    /// `user` accepts the pending request from `requester`. Returns false
    /// (no-op) when no such request exists.
    pub fn accept(&mut self, user: &str, requester: &str) -> bool {
        if !self.has_pending(user, requester) {
            return false;
        }
        self.entry_mut(user).pending.remove(requester);
        self.link(user, requester);
        true
    }

    /// `user` declines the pending request from `requester`. Returns false
    /// (no-op) when no such request exists.
    pub fn reject(&mut self, user: &str, requester: &str) -> bool {
        if !self.has_pending(user, requester) {
            return false;
        }
        self.entry_mut(user).pending.remove(requester);
        true
    }

    /// Drop the friendship edge between `user` and `friend` from both
    /// sides. Returns false (no-op) when they were not friends.
    pub fn remove(&mut self, user: &str, friend: &str) -> bool {
        if !self.are_friends(user, friend) {
            return false;
        }
        self.entry_mut(user).friends.remove(friend);
        self.entry_mut(friend).friends.remove(user);
        true
    }

    pub fn are_friends(&self, a: &str, b: &str) -> bool {
        self.users.get(a).is_some_and(|entry| entry.friends.contains(b))
    }

    fn has_pending(&self, user: &str, requester: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|entry| entry.pending.contains(requester))
    }

    fn link(&mut self, a: &str, b: &str) {
        self.entry_mut(a).friends.insert(b.to_string());
        self.entry_mut(b).friends.insert(a.to_string());
    }

    fn entry_mut(&mut self, name: &str) -> &mut UserEntry {
        self.users.entry(name.to_string()).or_default()
    }

    /// Friend list, lexicographic.
    pub fn friends_of(&self, user: &str) -> Vec<String> {
        self.users
            .get(user)
            .map(|entry| entry.friends.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Incoming requesters, lexicographic.
    pub fn pending_of(&self, user: &str) -> Vec<String> {
        self.users
            .get(user)
            .map(|entry| entry.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Durable record for one user, as the persistence gateway stores it.
    pub fn record_for(&self, username: &str) -> UserRecord {
        let entry = self.users.get(username);
        UserRecord {
            username: username.to_string(),
            profile_picture: entry
                .map(|e| e.profile_picture.clone())
                .unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            friends: self.friends_of(username),
            pending_requests: self.pending_of(username),
        }
    }

    /// Friendship and pending maps for the fallback snapshot document.
    pub fn snapshot_maps(
        &self,
    ) -> (
        BTreeMap<String, Vec<String>>,
        BTreeMap<String, Vec<String>>,
    ) {
        let mut friendships = BTreeMap::new();
        let mut pending = BTreeMap::new();
        for (name, entry) in &self.users {
            friendships.insert(name.clone(), entry.friends.iter().cloned().collect());
            pending.insert(name.clone(), entry.pending.iter().cloned().collect());
        }
        (friendships, pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(users: &[&str]) -> SocialGraph {
        let mut graph = SocialGraph::default();
        for user in users {
            graph.ensure_user(user, DEFAULT_AVATAR);
        }
        graph
    }

    #[test]
    fn accept_creates_a_symmetric_edge() {
        let mut graph = graph_with(&["alice", "bob"]);

        assert_eq!(graph.propose("alice", "bob"), ProposeOutcome::Requested);
        assert_eq!(graph.pending_of("bob"), ["alice"]);
        assert!(graph.friends_of("alice").is_empty());

        assert!(graph.accept("bob", "alice"));
        assert!(graph.are_friends("alice", "bob"));
        assert!(graph.are_friends("bob", "alice"));
        assert!(graph.pending_of("bob").is_empty());
    }

    #[test]
    fn friends_and_pending_are_mutually_exclusive() {
        let mut graph = graph_with(&["alice", "bob"]);
        graph.propose("alice", "bob");
        graph.accept("bob", "alice");

        // a second proposal in either direction is a no-op report
        assert_eq!(graph.propose("alice", "bob"), ProposeOutcome::AlreadyRelated);
        assert_eq!(graph.propose("bob", "alice"), ProposeOutcome::AlreadyRelated);
        assert!(graph.pending_of("alice").is_empty());
        assert!(graph.pending_of("bob").is_empty());
    }

    #[test]
    fn duplicate_request_is_already_related() {
        let mut graph = graph_with(&["alice", "bob"]);
        assert_eq!(graph.propose("alice", "bob"), ProposeOutcome::Requested);
        assert_eq!(graph.propose("alice", "bob"), ProposeOutcome::AlreadyRelated);
        assert_eq!(graph.pending_of("bob"), ["alice"]);
    }

    #[test]
    fn opposite_requests_auto_accept_with_no_leftover_pending() {
        let mut graph = graph_with(&["alice", "bob"]);

        assert_eq!(graph.propose("alice", "bob"), ProposeOutcome::Requested);
        assert_eq!(graph.propose("bob", "alice"), ProposeOutcome::AutoAccepted);

        assert!(graph.are_friends("alice", "bob"));
        assert!(graph.are_friends("bob", "alice"));
        assert!(graph.pending_of("alice").is_empty());
        assert!(graph.pending_of("bob").is_empty());
    }

    #[test]
    fn reject_clears_the_request_without_an_edge() {
        let mut graph = graph_with(&["alice", "bob"]);
        graph.propose("alice", "bob");

        assert!(graph.reject("bob", "alice"));
        assert!(graph.pending_of("bob").is_empty());
        assert!(!graph.are_friends("alice", "bob"));

        // nothing left to reject
        assert!(!graph.reject("bob", "alice"));
    }

    #[test]
    fn removal_clears_both_sides_and_allows_a_fresh_request() {
        let mut graph = graph_with(&["alice", "bob"]);
        graph.propose("alice", "bob");
        graph.accept("bob", "alice");

        assert!(graph.remove("alice", "bob"));
        assert!(graph.friends_of("alice").is_empty());
        assert!(graph.friends_of("bob").is_empty());
        assert!(!graph.remove("alice", "bob"));

        // no stale state blocks a new round
        assert_eq!(graph.propose("alice", "bob"), ProposeOutcome::Requested);
        assert_eq!(graph.pending_of("bob"), ["alice"]);
    }

    #[test]
    fn symmetry_holds_across_mixed_operation_sequences() {
        let mut graph = graph_with(&["alice", "bob", "carol"]);
        graph.propose("alice", "bob");
        graph.accept("bob", "alice");
        graph.propose("carol", "bob");
        graph.propose("bob", "carol"); // auto-accept
        graph.remove("bob", "alice");
        graph.propose("alice", "carol");
        graph.reject("carol", "alice");

        for a in ["alice", "bob", "carol"] {
            for b in ["alice", "bob", "carol"] {
                assert_eq!(
                    graph.are_friends(a, b),
                    graph.are_friends(b, a),
                    "asymmetric edge {a}-{b}"
                );
            }
        }
        assert!(graph.are_friends("bob", "carol"));
        assert!(!graph.are_friends("alice", "bob"));
        assert!(graph.pending_of("carol").is_empty());
    }

    #[test]
    fn known_names_match_case_insensitively() {
        let mut graph = SocialGraph::default();
        graph.ensure_user("Bob", "bob.png");

        assert!(graph.is_known("bob"));
        assert!(graph.is_known("BOB"));
        assert!(!graph.is_known("alice"));
    }

    #[test]
    fn request_targets_do_not_reserve_a_name() {
        let mut graph = graph_with(&["alice"]);
        graph.propose("alice", "bob");

        // bob has a pending entry but never registered
        assert_eq!(graph.pending_of("bob"), ["alice"]);
        assert!(!graph.is_known("bob"));
    }

    #[test]
    fn record_reflects_current_relations() {
        let mut graph = SocialGraph::default();
        graph.ensure_user("alice", "alice.png");
        graph.propose("bob", "alice");

        let record = graph.record_for("alice");
        assert_eq!(record.profile_picture, "alice.png");
        assert_eq!(record.pending_requests, ["bob"]);
        assert!(record.friends.is_empty());
    }
}
