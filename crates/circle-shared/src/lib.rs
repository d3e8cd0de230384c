//! # circle-shared
//!
//! Identifier newtypes, constants and validation rules shared by the store
//! and client crates.

pub mod constants;
pub mod error;
pub mod types;
pub mod validation;

pub use error::ValidationError;
pub use types::{
    incoming_channel_name, CommentId, ConversationPair, FriendshipId, LikeId, MessageId, PostId,
    TempId, UserId,
};
