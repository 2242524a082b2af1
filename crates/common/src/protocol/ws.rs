// Realtime event types for the chitchat.v1 WebSocket channel.
//
// Frames are JSON text, adjacently tagged: `{"event": "<name>", "data": {..}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CURRENT_PROTOCOL_VERSION: &str = "chitchat.v1";

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Pending inbound friend request count for the recipient.
    #[serde(rename = "notifications:count")]
    NotificationsCount { count: u64 },

    /// A friend request just arrived.
    #[serde(rename = "request:new")]
    RequestNew { from: String },

    /// A friendship was created; the UI can open the new thread.
    #[serde(rename = "friend:added", rename_all = "camelCase")]
    FriendAdded { friend_username: String },

    /// A message was delivered to the recipient's thread.
    #[serde(rename = "message:new")]
    MessageNew { from: String, to: String, message: MessagePreview },

    /// Unseen badge for one thread of the recipient.
    #[serde(rename = "chat:unseen_update", rename_all = "camelCase")]
    ChatUnseenUpdate { friend_username: String, unseen_count: u64 },

    /// Broadcast: someone changed their profile picture.
    #[serde(rename = "profile:updated")]
    ProfileUpdated { username: String, profile: String },

    /// Broadcast: a new account exists.
    #[serde(rename = "user:created")]
    UserCreated { username: String, profile: String },

    /// Protocol or authorization failure on the socket.
    #[serde(rename = "error")]
    Error { code: String, message: String, retryable: bool },
}

impl ServerEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotificationsCount { .. } => "notifications:count",
            Self::RequestNew { .. } => "request:new",
            Self::FriendAdded { .. } => "friend:added",
            Self::MessageNew { .. } => "message:new",
            Self::ChatUnseenUpdate { .. } => "chat:unseen_update",
            Self::ProfileUpdated { .. } => "profile:updated",
            Self::UserCreated { .. } => "user:created",
            Self::Error { .. } => "error",
        }
    }
}

/// Payload of `message:new`, enough for the client to render immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePreview {
    pub text: String,
    pub image: bool,
    pub time: DateTime<Utc>,
}

/// Client -> Server events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Must be the first frame on a new socket.
    #[serde(rename = "hello")]
    Hello { token: String },

    /// The client displayed the thread with `friend`; clear its unseen badge.
    #[serde(rename = "chat_read")]
    ChatRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        me: Option<String>,
        friend: String,
    },
}

impl ClientEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::ChatRead { .. } => "chat_read",
        }
    }
}
