use serde::{Deserialize, Serialize};

/// Avatar used when a client registers without picking one, and for users
/// reconstructed from a fallback snapshot (which carries no profiles).
pub const DEFAULT_AVATAR: &str = "assets/default-avatar.png";

/// Sender marker substituted for the recipient's own username in history
/// views, so clients never need to match names themselves.
pub const SELF_SENDER: &str = "me";

/// Durable per-user record: identity plus both sides of the social graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    pub profile_picture: String,
    pub friends: Vec<String>,
    pub pending_requests: Vec<String>,
}

/// Durable per-message record, keyed by its canonical conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub conversation_key: String,
    pub sender: String,
    pub text: String,
    /// Milliseconds since the Unix epoch, captured at send time.
    pub timestamp: i64,
    pub avatar_reference: String,
}

/// A message as held in a conversation thread and shipped to clients.
/// The avatar is captured when the message is sent, so history keeps the
/// sender's picture from that moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub avatar_reference: String,
}

/// Roster entry for the global online-user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: String,
    pub profile_picture: String,
}
