// Core chat domain types shared by the server and clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a conversation a stored message belongs to, relative to
/// the owner of the thread that holds it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(Self::Sent),
            "received" => Some(Self::Received),
            _ => None,
        }
    }
}

/// Read state of a stored message. Only ever moves `Unread -> Read`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Unread,
    Read,
}

impl ReadStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "unread" => Some(Self::Unread),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// One entry in a [`FriendThread`].
///
/// When `has_image` is set, `text` carries the encoded image payload rather
/// than a caption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub has_image: bool,
    pub time: DateTime<Utc>,
    pub direction: Direction,
    pub status: ReadStatus,
}

impl Message {
    /// The copy stored in the sender's own thread. Senders have seen their
    /// own messages, so it starts out read.
    pub fn outgoing(body: &MessageBody, time: DateTime<Utc>) -> Self {
        Self {
            text: body.payload.clone(),
            has_image: body.has_image,
            time,
            direction: Direction::Sent,
            status: ReadStatus::Read,
        }
    }

    /// The copy stored in the recipient's thread.
    pub fn incoming(body: &MessageBody, time: DateTime<Utc>) -> Self {
        Self {
            text: body.payload.clone(),
            has_image: body.has_image,
            time,
            direction: Direction::Received,
            status: ReadStatus::Unread,
        }
    }

    /// Counts toward the owner's unseen badge.
    pub fn is_unseen(&self) -> bool {
        self.direction == Direction::Received && self.status == ReadStatus::Unread
    }
}

/// The stored payload derived from one send request.
///
/// An attached image replaces the text: the image data becomes the payload
/// and any caption is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub payload: String,
    pub has_image: bool,
}

impl MessageBody {
    /// Returns `None` when the request carries neither text nor an image.
    pub fn from_parts(text: &str, image: Option<&str>) -> Option<Self> {
        match image.filter(|image| !image.is_empty()) {
            Some(image) => Some(Self { payload: image.to_owned(), has_image: true }),
            None if !text.trim().is_empty() => {
                Some(Self { payload: text.to_owned(), has_image: false })
            }
            None => None,
        }
    }
}

/// Number of messages in a thread that count toward the unseen badge.
pub fn unseen_in(messages: &[Message]) -> u64 {
    messages.iter().filter(|message| message.is_unseen()).count() as u64
}

/// One party's view of a two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendThread {
    pub peer: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl FriendThread {
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into(), messages: Vec::new() }
    }

    pub fn unseen_count(&self) -> u64 {
        unseen_in(&self.messages)
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|message| message.time).max()
    }
}

/// Public account listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub username: String,
    pub email: String,
    pub profile: String,
}

/// Row of the caller's chat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub friend_username: String,
    pub unseen_count: u64,
    #[serde(skip)]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Sort chats so the most recently active conversation comes first and
/// threads that never saw a message sink to the bottom.
pub fn sort_chats_by_recency(chats: &mut [ChatSummary]) {
    chats.sort_by(|left, right| right.last_message_at.cmp(&left.last_message_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).single().expect("valid timestamp")
    }

    #[test]
    fn image_replaces_text_payload() {
        let body = MessageBody::from_parts("caption", Some("aGVsbG8=")).expect("body");
        assert_eq!(body.payload, "aGVsbG8=");
        assert!(body.has_image);
    }

    #[test]
    fn empty_image_falls_back_to_text() {
        let body = MessageBody::from_parts("hi", Some("")).expect("body");
        assert_eq!(body.payload, "hi");
        assert!(!body.has_image);
    }

    #[test]
    fn blank_text_without_image_is_rejected() {
        assert!(MessageBody::from_parts("   ", None).is_none());
    }

    #[test]
    fn outgoing_copy_is_read_and_incoming_copy_is_unread() {
        let body = MessageBody::from_parts("hi", None).expect("body");
        let sent = Message::outgoing(&body, at(0));
        let received = Message::incoming(&body, at(0));

        assert_eq!((sent.direction, sent.status), (Direction::Sent, ReadStatus::Read));
        assert_eq!(
            (received.direction, received.status),
            (Direction::Received, ReadStatus::Unread)
        );
        assert!(!sent.is_unseen());
        assert!(received.is_unseen());
    }

    #[test]
    fn unseen_counts_only_received_unread() {
        let body = MessageBody::from_parts("x", None).expect("body");
        let mut read_received = Message::incoming(&body, at(2));
        read_received.status = ReadStatus::Read;
        let messages = vec![
            Message::incoming(&body, at(0)),
            Message::outgoing(&body, at(1)),
            read_received,
            Message::incoming(&body, at(3)),
        ];

        assert_eq!(unseen_in(&messages), 2);
    }

    #[test]
    fn message_serializes_with_camel_case_fields() {
        let body = MessageBody::from_parts("hi", None).expect("body");
        let value = serde_json::to_value(Message::incoming(&body, at(0))).expect("json");

        assert_eq!(value["hasImage"], false);
        assert_eq!(value["direction"], "received");
        assert_eq!(value["status"], "unread");
        assert_eq!(value["time"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn chats_sort_by_latest_message_with_empty_threads_last() {
        let mut chats = vec![
            ChatSummary { friend_username: "empty".into(), unseen_count: 0, last_message_at: None },
            ChatSummary { friend_username: "old".into(), unseen_count: 0, last_message_at: Some(at(1)) },
            ChatSummary { friend_username: "new".into(), unseen_count: 3, last_message_at: Some(at(9)) },
        ];

        sort_chats_by_recency(&mut chats);

        let order: Vec<_> = chats.iter().map(|chat| chat.friend_username.as_str()).collect();
        assert_eq!(order, ["new", "old", "empty"]);
    }

    #[test]
    fn db_values_round_trip_known_variants_only() {
        assert_eq!(Direction::from_db_value(Direction::Sent.as_str()), Some(Direction::Sent));
        assert_eq!(ReadStatus::from_db_value(ReadStatus::Unread.as_str()), Some(ReadStatus::Unread));
        assert_eq!(Direction::from_db_value("sideways"), None);
    }
}
