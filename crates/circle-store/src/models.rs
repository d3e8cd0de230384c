//! Domain model structs exchanged with the remote data store.
//!
//! Every struct derives `Serialize` and `Deserialize` so rows coming back
//! from a gateway can be decoded directly, embedded profile references
//! included.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use circle_shared::{CommentId, FriendshipId, LikeId, MessageId, PostId, UserId};

use crate::error::Result;
use crate::query::{Embed, Row};

/// Decode a gateway row into a typed model.
pub fn decode<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Decode a list of gateway rows.
pub fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Public profile of a user.  The primary key is the user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Full name, falling back to the username.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("Unknown User")
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

pub(crate) const MESSAGE_EMBEDS: [Embed; 2] = [
    Embed::profile("sender_profile", "sender_id"),
    Embed::profile("receiver_profile", "receiver_id"),
];

/// A confirmed direct message row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub seen: bool,
    /// Present when the row was fetched with profile references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_profile: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_profile: Option<Profile>,
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

pub(crate) const FRIEND_EMBEDS: [Embed; 2] = [
    Embed::profile("requester_profile", "requester_id"),
    Embed::profile("addressee_profile", "addressee_id"),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FriendStatus::Pending => "pending",
            FriendStatus::Accepted => "accepted",
            FriendStatus::Rejected => "rejected",
        }
    }
}

/// A friend request or an established friendship between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    pub id: FriendshipId,
    pub requester_id: UserId,
    pub addressee_id: UserId,
    pub status: FriendStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_profile: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressee_profile: Option<Profile>,
}

impl Friendship {
    /// Identity of the participant that is not `me`.
    pub fn other_id(&self, me: UserId) -> UserId {
        if self.requester_id == me {
            self.addressee_id
        } else {
            self.requester_id
        }
    }

    /// Profile of the participant that is not `me`, when embedded.
    pub fn other_profile(&self, me: UserId) -> Option<&Profile> {
        if self.requester_id == me {
            self.addressee_profile.as_ref()
        } else {
            self.requester_profile.as_ref()
        }
    }
}

// ---------------------------------------------------------------------------
// Posts, likes, comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const AUTHOR_EMBED: Embed = Embed::profile("author", "user_id");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Like {
    pub id: LikeId,
    pub post_id: PostId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    /// Profile of the user who liked the post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Profile of the commenting user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Profile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_message_with_null_embed() {
        let sender = UserId::new();
        let receiver = UserId::new();
        let row = json!({
            "id": MessageId::new(),
            "sender_id": sender,
            "receiver_id": receiver,
            "content": "hello",
            "created_at": "2024-05-01T10:00:00.000000Z",
            "updated_at": "2024-05-01T10:00:00.000000Z",
            "seen": false,
            "sender_profile": null,
        });
        let message: Message = decode(row.as_object().cloned().unwrap()).unwrap();
        assert_eq!(message.sender_id, sender);
        assert_eq!(message.receiver_id, receiver);
        assert!(message.sender_profile.is_none());
        assert!(!message.seen);
    }

    #[test]
    fn friendship_other_side() {
        let me = UserId::new();
        let them = UserId::new();
        let now = Utc::now();
        let f = Friendship {
            id: FriendshipId::new(),
            requester_id: them,
            addressee_id: me,
            status: FriendStatus::Pending,
            created_at: now,
            updated_at: now,
            requester_profile: None,
            addressee_profile: None,
        };
        assert_eq!(f.other_id(me), them);
        assert_eq!(f.other_id(them), me);
    }

    #[test]
    fn display_name_falls_back() {
        let now = Utc::now();
        let mut p = Profile {
            id: UserId::new(),
            username: Some("ada".into()),
            full_name: None,
            avatar_url: None,
            bio: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(p.display_name(), "ada");
        p.full_name = Some("Ada Lovelace".into());
        assert_eq!(p.display_name(), "Ada Lovelace");
        p.full_name = None;
        p.username = None;
        assert_eq!(p.display_name(), "Unknown User");
    }
}
