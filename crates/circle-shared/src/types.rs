use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CONVERSATION_CHANNEL_PREFIX, INCOMING_CHANNEL_PREFIX, TEMP_ID_PREFIX};
use crate::error::ValidationError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| ValidationError::InvalidId(s.to_string()))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for serde_json::Value {
            fn from(id: $name) -> Self {
                serde_json::Value::String(id.0.to_string())
            }
        }
    };
}

uuid_id!(
    /// Identity of an authenticated user (also the primary key of their profile).
    UserId
);
uuid_id!(
    /// Server-assigned identity of a confirmed message row.
    MessageId
);
uuid_id!(PostId);
uuid_id!(
    /// Row identity of a friendship (request or accepted relation).
    FriendshipId
);
uuid_id!(LikeId);
uuid_id!(CommentId);

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

/// Locally generated identity of an optimistic message that has not been
/// confirmed by the backend yet.  Renders as `temp_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(u64);

impl TempId {
    /// Allocate a process-unique temporary identity.
    pub fn next() -> Self {
        Self(NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEMP_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for TempId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(TEMP_ID_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidId(s.to_string()))
    }
}

/// Unordered pair of conversation participants, stored in canonical order so
/// both sides derive the same realtime channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationPair {
    low: UserId,
    high: UserId,
}

impl ConversationPair {
    pub fn new(a: UserId, b: UserId) -> Result<Self, ValidationError> {
        if a == b {
            return Err(ValidationError::SelfConversation);
        }
        // Sort on the rendered form so the order matches any other client
        // that sorts the textual ids.
        let (low, high) = if a.to_string() <= b.to_string() {
            (a, b)
        } else {
            (b, a)
        };
        Ok(Self { low, high })
    }

    pub fn members(&self) -> (UserId, UserId) {
        (self.low, self.high)
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.low == user || self.high == user
    }

    /// The other participant, or `None` if `me` is not part of the pair.
    pub fn peer_of(&self, me: UserId) -> Option<UserId> {
        if me == self.low {
            Some(self.high)
        } else if me == self.high {
            Some(self.low)
        } else {
            None
        }
    }

    pub fn channel_name(&self) -> String {
        format!("{CONVERSATION_CHANNEL_PREFIX}:{}:{}", self.low, self.high)
    }
}

/// Realtime channel carrying every message addressed to `user`.
pub fn incoming_channel_name(user: UserId) -> String {
    format!("{INCOMING_CHANNEL_PREFIX}:{user}")
}
