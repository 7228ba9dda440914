use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use zephyr_store::LoadedState;
use zephyr_store::snapshot::Snapshot;
use zephyr_store::worker::{PersistHandle, PersistJob};
use zephyr_types::events::{ClientCommand, MessageEcho, ServerEvent};
use zephyr_types::models::{MessageRecord, UserProfile};

use crate::conversations::ConversationStore;
use crate::graph::{ProposeOutcome, SocialGraph};
use crate::registry::SessionRegistry;

/// Messages consumed by the coordinator actor. Every shared-state mutation
/// in the relay happens by sending one of these; the actor processes them
/// one at a time, so handlers never interleave.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A connection was accepted; its outbound channel is registered here.
    Connect {
        conn_id: Uuid,
        events: mpsc::UnboundedSender<ServerEvent>,
    },
    /// A parsed client command arrived on a connection.
    Command {
        conn_id: Uuid,
        command: ClientCommand,
    },
    /// The connection closed; sent exactly once per connection.
    Disconnect { conn_id: Uuid },
    /// Persist a full snapshot of the current state.
    Snapshot,
    /// Flush a final snapshot and acknowledge, then stop.
    Shutdown { done: oneshot::Sender<()> },
}

/// Enqueue side of the coordinator queue, held by connections and timers.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorMessage>,
}

impl CoordinatorHandle {
    pub fn connect(&self, conn_id: Uuid, events: mpsc::UnboundedSender<ServerEvent>) {
        self.send(CoordinatorMessage::Connect { conn_id, events });
    }

    pub fn command(&self, conn_id: Uuid, command: ClientCommand) {
        self.send(CoordinatorMessage::Command { conn_id, command });
    }

    pub fn disconnect(&self, conn_id: Uuid) {
        self.send(CoordinatorMessage::Disconnect { conn_id });
    }

    pub fn snapshot(&self) {
        self.send(CoordinatorMessage::Snapshot);
    }

    /// Flush a final snapshot through the persistence queue and wait for
    /// the write to land.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(CoordinatorMessage::Shutdown { done: done_tx });
        let _ = done_rx.await;
    }

    fn send(&self, msg: CoordinatorMessage) {
        if self.tx.send(msg).is_err() {
            warn!("Coordinator gone; message dropped");
        }
    }
}

/// Owns the session registry, social graph, and conversation store, and
/// maps inbound commands to store mutations and outbound events. In-memory
/// mutation is synchronous; persistence is enqueued afterwards and never
/// awaited by a handler (mutate-then-persist, never persist-then-mutate).
pub struct Coordinator {
    registry: SessionRegistry,
    graph: SocialGraph,
    conversations: ConversationStore,
    persist: PersistHandle,
}

impl Coordinator {
    pub fn new(persist: PersistHandle) -> Self {
        Self {
            registry: SessionRegistry::default(),
            graph: SocialGraph::default(),
            conversations: ConversationStore::default(),
            persist,
        }
    }

    /// Restore durable state produced by the persistence gateway.
    pub fn seed(&mut self, state: LoadedState) {
        for record in state.users {
            self.graph.seed_record(record);
        }
        self.conversations.seed(state.messages);
    }

    /// Move the coordinator onto its actor task. The returned handle is
    /// the only way to reach the shared state from then on.
    pub fn spawn(mut self) -> CoordinatorHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let CoordinatorMessage::Shutdown { done } = msg {
                    self.flush_and_ack(done).await;
                    break;
                }
                self.handle(msg);
            }
            debug!("Coordinator queue closed");
        });
        CoordinatorHandle { tx }
    }

    async fn flush_and_ack(&mut self, done: oneshot::Sender<()>) {
        info!("Writing final snapshot before shutdown");
        self.persist
            .enqueue(PersistJob::Snapshot(self.build_snapshot()));
        let (ack_tx, ack_rx) = oneshot::channel();
        self.persist.enqueue(PersistJob::Flush(ack_tx));
        let _ = ack_rx.await;
        let _ = done.send(());
    }

    pub fn handle(&mut self, msg: CoordinatorMessage) {
        match msg {
            CoordinatorMessage::Connect { conn_id, events } => {
                self.registry.connect(conn_id, events);
            }
            CoordinatorMessage::Command { conn_id, command } => {
                self.handle_command(conn_id, command);
            }
            CoordinatorMessage::Disconnect { conn_id } => self.handle_disconnect(conn_id),
            CoordinatorMessage::Snapshot => {
                self.persist
                    .enqueue(PersistJob::Snapshot(self.build_snapshot()));
            }
            // the actor loop intercepts Shutdown; direct calls just ack
            CoordinatorMessage::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    fn handle_command(&mut self, conn_id: Uuid, command: ClientCommand) {
        match command {
            ClientCommand::Register {
                username,
                profile_picture,
            } => self.handle_register(conn_id, username, profile_picture),
            command => {
                // every other command needs a bound session; the session
                // identity is authoritative, payload identity fields are
                // ignored
                let Some(actor) = self.registry.identity(conn_id).cloned() else {
                    warn!(%conn_id, "Command from unregistered connection ignored");
                    return;
                };
                match command {
                    ClientCommand::Register { .. } => {} // handled above
                    ClientCommand::AddFriend {
                        friend_username, ..
                    } => self.handle_add_friend(conn_id, &actor, friend_username),
                    ClientCommand::AcceptFriendRequest {
                        friend_username, ..
                    } => self.handle_accept(conn_id, &actor, friend_username),
                    ClientCommand::RejectFriendRequest {
                        friend_username, ..
                    } => self.handle_reject(conn_id, &actor, friend_username),
                    ClientCommand::RemoveFriend {
                        friend_username, ..
                    } => self.handle_remove(conn_id, &actor, friend_username),
                    ClientCommand::SendMessage { to, text, .. } => {
                        self.handle_send_message(conn_id, &actor, to, text);
                    }
                }
            }
        }
    }

    fn handle_register(&mut self, conn_id: Uuid, username: String, profile_picture: String) {
        if username.trim().is_empty() {
            self.registry.send_to(
                conn_id,
                ServerEvent::RegisterResponse {
                    success: false,
                    message: Some("A username is required.".into()),
                },
            );
            return;
        }
        if self.registry.identity(conn_id).is_some() {
            warn!(%conn_id, "Connection attempted a second registration");
            self.registry.send_to(
                conn_id,
                ServerEvent::RegisterResponse {
                    success: false,
                    message: Some("This connection is already registered.".into()),
                },
            );
            return;
        }

        let taken = self.graph.is_known(&username)
            || self
                .registry
                .register(conn_id, &username, &profile_picture)
                .is_err();
        if taken {
            debug!(username, "Registration rejected: name taken");
            self.registry.send_to(
                conn_id,
                ServerEvent::RegisterResponse {
                    success: false,
                    message: Some(
                        "That username is already in use. Please pick another one.".into(),
                    ),
                },
            );
            return;
        }

        info!(username, %conn_id, "User registered");
        self.graph.ensure_user(&username, &profile_picture);
        self.persist_users(&[&username]);

        self.registry.send_to(
            conn_id,
            ServerEvent::RegisterResponse {
                success: true,
                message: None,
            },
        );
        self.broadcast_roster();
        self.registry
            .send_to(conn_id, ServerEvent::FriendList(self.graph.friends_of(&username)));
        self.registry.send_to(
            conn_id,
            ServerEvent::PendingFriendRequests(self.graph.pending_of(&username)),
        );
        self.registry.send_to(
            conn_id,
            ServerEvent::LoadConversations(self.conversations.history_for(&username)),
        );
    }

    fn handle_add_friend(&mut self, conn_id: Uuid, actor: &UserProfile, friend_username: String) {
        match self.graph.propose(&actor.username, &friend_username) {
            ProposeOutcome::AlreadyRelated => {
                self.registry.send_to(
                    conn_id,
                    ServerEvent::FriendRequestSent {
                        success: false,
                        friend_username,
                        message: Some("Request already sent, or you are already friends.".into()),
                    },
                );
            }
            ProposeOutcome::AutoAccepted => {
                info!(
                    from = actor.username,
                    to = friend_username,
                    "Opposite requests resolved into a friendship"
                );
                self.persist_users(&[&actor.username, &friend_username]);
                self.notify_friend_added(conn_id, &actor.username, &friend_username);
            }
            ProposeOutcome::Requested => {
                debug!(from = actor.username, to = friend_username, "Friend request recorded");
                self.persist_users(&[&friend_username]);
                self.registry.send_to(
                    conn_id,
                    ServerEvent::FriendRequestSent {
                        success: true,
                        friend_username: friend_username.clone(),
                        message: None,
                    },
                );
                self.registry.send_to_user(
                    &friend_username,
                    ServerEvent::NewFriendRequest {
                        from: actor.username.clone(),
                    },
                );
                self.registry.send_to_user(
                    &friend_username,
                    ServerEvent::PendingFriendRequests(self.graph.pending_of(&friend_username)),
                );
            }
        }
    }

    fn handle_accept(&mut self, conn_id: Uuid, actor: &UserProfile, friend_username: String) {
        if !self.graph.accept(&actor.username, &friend_username) {
            debug!(
                user = actor.username,
                requester = friend_username,
                "Accept without a matching request ignored"
            );
            return;
        }
        self.persist_users(&[&actor.username, &friend_username]);
        self.notify_friend_added(conn_id, &actor.username, &friend_username);
    }

    fn handle_reject(&mut self, conn_id: Uuid, actor: &UserProfile, friend_username: String) {
        if !self.graph.reject(&actor.username, &friend_username) {
            debug!(
                user = actor.username,
                requester = friend_username,
                "Reject without a matching request ignored"
            );
            return;
        }
        self.persist_users(&[&actor.username]);
        self.registry.send_to(
            conn_id,
            ServerEvent::FriendRequestRejected {
                success: true,
                friend_username: friend_username.clone(),
                message: None,
            },
        );
        self.registry.send_to(
            conn_id,
            ServerEvent::PendingFriendRequests(self.graph.pending_of(&actor.username)),
        );
        self.registry.send_to_user(
            &friend_username,
            ServerEvent::FriendRequestRejected {
                success: true,
                friend_username: actor.username.clone(),
                message: Some("Your friend request was declined.".into()),
            },
        );
    }

    fn handle_remove(&mut self, conn_id: Uuid, actor: &UserProfile, friend_username: String) {
        if !self.graph.remove(&actor.username, &friend_username) {
            debug!(
                user = actor.username,
                friend = friend_username,
                "Removal of a non-friend ignored"
            );
            return;
        }
        self.persist_users(&[&actor.username, &friend_username]);
        self.registry.send_to(
            conn_id,
            ServerEvent::FriendRemoved {
                success: true,
                friend_username: friend_username.clone(),
            },
        );
        self.registry.send_to(
            conn_id,
            ServerEvent::FriendList(self.graph.friends_of(&actor.username)),
        );
        self.registry.send_to_user(
            &friend_username,
            ServerEvent::FriendRemoved {
                success: true,
                friend_username: actor.username.clone(),
            },
        );
        self.registry.send_to_user(
            &friend_username,
            ServerEvent::FriendList(self.graph.friends_of(&friend_username)),
        );
    }

    fn handle_send_message(&mut self, conn_id: Uuid, actor: &UserProfile, to: String, text: String) {
        if text.is_empty() {
            warn!(from = actor.username, "Empty message dropped");
            return;
        }

        let timestamp = Utc::now().timestamp_millis();
        let (key, stored) = self.conversations.append(
            &actor.username,
            &to,
            text,
            actor.profile_picture.clone(),
            timestamp,
        );
        self.persist_message(MessageRecord {
            conversation_key: key,
            sender: stored.sender.clone(),
            text: stored.text.clone(),
            timestamp: stored.timestamp,
            avatar_reference: stored.avatar_reference.clone(),
        });

        // realtime delivery only when the recipient is live; otherwise the
        // persisted thread catches them up on their next registration
        self.registry.send_to_user(
            &to,
            ServerEvent::NewMessage {
                from: actor.username.clone(),
                text: stored.text.clone(),
                avatar_reference: stored.avatar_reference.clone(),
            },
        );
        self.registry.send_to(
            conn_id,
            ServerEvent::MessageSent {
                success: true,
                message: MessageEcho {
                    sender: stored.sender,
                    to,
                    text: stored.text,
                    timestamp: stored.timestamp,
                    avatar_reference: stored.avatar_reference,
                },
            },
        );
    }

    fn handle_disconnect(&mut self, conn_id: Uuid) {
        match self.registry.unregister(conn_id) {
            Some(identity) => {
                info!(username = identity.username, %conn_id, "Session closed");
                self.broadcast_roster();
            }
            None => debug!(%conn_id, "Connection closed before registration"),
        }
    }

    /// Both ends of a new edge get a confirmation and their refreshed
    /// lists; the acting side also gets its refreshed pending list.
    fn notify_friend_added(&self, conn_id: Uuid, actor: &str, friend: &str) {
        self.registry.send_to(
            conn_id,
            ServerEvent::FriendAdded {
                success: true,
                friend_username: friend.to_string(),
            },
        );
        self.registry
            .send_to(conn_id, ServerEvent::FriendList(self.graph.friends_of(actor)));
        self.registry.send_to(
            conn_id,
            ServerEvent::PendingFriendRequests(self.graph.pending_of(actor)),
        );
        self.registry.send_to_user(
            friend,
            ServerEvent::FriendAdded {
                success: true,
                friend_username: actor.to_string(),
            },
        );
        self.registry
            .send_to_user(friend, ServerEvent::FriendList(self.graph.friends_of(friend)));
    }

    fn broadcast_roster(&self) {
        self.registry
            .broadcast(&ServerEvent::UserList(self.registry.roster()));
    }

    /// Mutate-then-persist: enqueue the changed user rows, or a full
    /// snapshot when no primary store is available (fallback
    /// write-through).
    fn persist_users(&self, usernames: &[&str]) {
        if self.persist.has_primary() {
            for username in usernames {
                self.persist
                    .enqueue(PersistJob::UpsertUser(self.graph.record_for(username)));
            }
        } else {
            self.persist
                .enqueue(PersistJob::Snapshot(self.build_snapshot()));
        }
    }

    fn persist_message(&self, record: MessageRecord) {
        if self.persist.has_primary() {
            self.persist.enqueue(PersistJob::InsertMessage(record));
        } else {
            self.persist
                .enqueue(PersistJob::Snapshot(self.build_snapshot()));
        }
    }

    /// Built synchronously between handlers, so the snapshot always
    /// serializes a fully consistent state.
    fn build_snapshot(&self) -> Snapshot {
        let (friendships, pending_friend_requests) = self.graph.snapshot_maps();
        Snapshot {
            conversations: self.conversations.snapshot_map(),
            friendships,
            pending_friend_requests,
        }
    }
}
