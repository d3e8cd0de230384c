use circle_shared::ValidationError;
use circle_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// A remote call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The operation needs a session in the `Ready` state.
    #[error("Conversation is not ready")]
    NotReady,

    #[error("A message is already being sent")]
    SendInFlight,

    #[error("No such message in this conversation")]
    UnknownMessage,

    /// Pending messages have no server identity yet and cannot be deleted.
    #[error("Message has not been confirmed yet")]
    PendingMessage,
}

pub type Result<T> = std::result::Result<T, ClientError>;
