use thiserror::Error;

/// Rejections raised before any remote call is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyContent,

    #[error("Message too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("Cannot open a conversation with yourself")]
    SelfConversation,

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}
