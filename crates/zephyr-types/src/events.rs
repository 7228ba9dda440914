use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{DEFAULT_AVATAR, StoredMessage, UserProfile};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Claim a display identity for this connection
    Register {
        username: String,
        #[serde(default = "default_avatar")]
        profile_picture: String,
    },

    /// Propose a friendship to another user
    AddFriend {
        username: String,
        friend_username: String,
    },

    /// Accept a pending request from `friend_username`
    AcceptFriendRequest {
        username: String,
        friend_username: String,
    },

    /// Decline a pending request from `friend_username`
    RejectFriendRequest {
        username: String,
        friend_username: String,
    },

    /// Drop an existing friendship edge
    RemoveFriend {
        username: String,
        friend_username: String,
    },

    /// Relay a text message to another user
    SendMessage {
        from: String,
        to: String,
        text: String,
    },
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Outcome of a registration attempt, sent to the origin only
    RegisterResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Global roster of live registered users, broadcast on every change
    UserList(Vec<UserProfile>),

    /// The recipient's current friend list
    FriendList(Vec<String>),

    /// Usernames with an unresolved request toward the recipient
    PendingFriendRequests(Vec<String>),

    /// Full reshaped history for the recipient, keyed by the other user
    LoadConversations(BTreeMap<String, Vec<StoredMessage>>),

    /// Acknowledges a friend request, or reports it as already sent/friends
    FriendRequestSent {
        success: bool,
        friend_username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A new request landed in the recipient's pending set
    NewFriendRequest { from: String },

    /// A friendship edge now exists with `friend_username`
    FriendAdded {
        success: bool,
        friend_username: String,
    },

    /// A pending request was declined
    FriendRequestRejected {
        success: bool,
        friend_username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A friendship edge with `friend_username` was removed
    FriendRemoved {
        success: bool,
        friend_username: String,
    },

    /// Echo confirming a sent message to its author
    MessageSent { success: bool, message: MessageEcho },

    /// A message addressed to the recipient, delivered in realtime
    NewMessage {
        from: String,
        text: String,
        avatar_reference: String,
    },
}

/// Payload of [`ServerEvent::MessageSent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEcho {
    pub sender: String,
    pub to: String,
    pub text: String,
    pub timestamp: i64,
    pub avatar_reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_names_are_camel_case() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"addFriend","data":{"username":"alice","friendUsername":"bob"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::AddFriend {
                username,
                friend_username,
            } => {
                assert_eq!(username, "alice");
                assert_eq!(friend_username, "bob");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn register_defaults_profile_picture() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"register","data":{"username":"alice"}}"#).unwrap();
        match cmd {
            ClientCommand::Register {
                profile_picture, ..
            } => assert_eq!(profile_picture, DEFAULT_AVATAR),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn register_response_omits_empty_message() {
        let json = serde_json::to_string(&ServerEvent::RegisterResponse {
            success: true,
            message: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"registerResponse","data":{"success":true}}"#);
    }

    #[test]
    fn new_message_uses_avatar_reference_field() {
        let json = serde_json::to_string(&ServerEvent::NewMessage {
            from: "alice".into(),
            text: "hi".into(),
            avatar_reference: "pic.png".into(),
        })
        .unwrap();
        assert!(json.contains(r#""avatarReference":"pic.png""#), "{json}");
    }
}
