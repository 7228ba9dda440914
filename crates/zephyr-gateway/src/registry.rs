use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use zephyr_types::events::ServerEvent;
use zephyr_types::models::UserProfile;

/// Registration collided with a username already held by a live session.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("username '{0}' is already taken")]
pub struct NameTaken(pub String);

struct ConnectionEntry {
    events: mpsc::UnboundedSender<ServerEvent>,
    identity: Option<UserProfile>,
}

/// Maps live connections to their outbound event channels and, once
/// registration completes, to the identity each connection represents.
/// The only component that knows which connection currently speaks for
/// which username.
#[derive(Default)]
pub struct SessionRegistry {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_username: HashMap<String, Uuid>,
}

impl SessionRegistry {
    /// Track a freshly accepted connection. No identity yet.
    pub fn connect(&mut self, conn_id: Uuid, events: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                events,
                identity: None,
            },
        );
    }

    /// Bind a registered identity to a live connection. Fails when another
    /// live session already holds the name, compared case-insensitively.
    pub fn register(
        &mut self,
        conn_id: Uuid,
        username: &str,
        profile_picture: &str,
    ) -> Result<(), NameTaken> {
        if self.is_live_name(username) {
            return Err(NameTaken(username.to_string()));
        }
        match self.connections.get_mut(&conn_id) {
            Some(entry) => {
                entry.identity = Some(UserProfile {
                    username: username.to_string(),
                    profile_picture: profile_picture.to_string(),
                });
                self.by_username.insert(username.to_string(), conn_id);
            }
            None => warn!(%conn_id, "Register for unknown connection"),
        }
        Ok(())
    }

    /// True when any live session holds `username`, ignoring case.
    pub fn is_live_name(&self, username: &str) -> bool {
        let needle = username.to_lowercase();
        self.connections
            .values()
            .filter_map(|entry| entry.identity.as_ref())
            .any(|identity| identity.username.to_lowercase() == needle)
    }

    /// Remove the binding for a closed connection. Returns the identity it
    /// held, if registration had completed. Called exactly once per
    /// connection, on disconnect.
    pub fn unregister(&mut self, conn_id: Uuid) -> Option<UserProfile> {
        let entry = self.connections.remove(&conn_id)?;
        let identity = entry.identity?;
        if self.by_username.get(&identity.username) == Some(&conn_id) {
            self.by_username.remove(&identity.username);
        }
        Some(identity)
    }

    /// Identity bound to a connection, if it has registered.
    pub fn identity(&self, conn_id: Uuid) -> Option<&UserProfile> {
        self.connections
            .get(&conn_id)
            .and_then(|entry| entry.identity.as_ref())
    }

    /// Connection currently representing `username`, if the user is live.
    pub fn by_username(&self, username: &str) -> Option<Uuid> {
        self.by_username.get(username).copied()
    }

    pub fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        if let Some(entry) = self.connections.get(&conn_id) {
            // receiver gone means the connection is already tearing down
            let _ = entry.events.send(event);
        }
    }

    /// Deliver to the named user's connection; silently skipped when the
    /// user is offline (they catch up from persisted history later).
    pub fn send_to_user(&self, username: &str, event: ServerEvent) {
        if let Some(conn_id) = self.by_username(username) {
            self.send_to(conn_id, event);
        }
    }

    /// Visit every live connection's outbound channel.
    pub fn for_each_live(&self, mut f: impl FnMut(Uuid, &mpsc::UnboundedSender<ServerEvent>)) {
        for (conn_id, entry) in &self.connections {
            f(*conn_id, &entry.events);
        }
    }

    /// Fan one event out to every live connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        self.for_each_live(|_, events| {
            let _ = events.send(event.clone());
        });
    }

    /// All registered identities, for the global roster.
    pub fn roster(&self) -> Vec<UserProfile> {
        let mut roster: Vec<UserProfile> = self
            .connections
            .values()
            .filter_map(|entry| entry.identity.clone())
            .collect();
        roster.sort_by(|a, b| a.username.cmp(&b.username));
        roster
    }
}
