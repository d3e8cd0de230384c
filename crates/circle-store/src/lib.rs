//! # circle-store
//!
//! Data access for the Circle client: the remote gateway contract and its
//! two implementations, typed models, and the message / social accessors.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use circle_store::{LocalBackend, MessageStore};
//!
//! let backend = Arc::new(LocalBackend::in_memory().expect("open backend"));
//! let messages = MessageStore::new(backend);
//! ```

pub mod database;
pub mod error;
pub mod gateway;
pub mod local;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod query;
pub mod rest;
pub(crate) mod schema;
pub mod social;
pub mod storage;
pub mod tables;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export the most commonly used items at crate root.
pub use database::Database;
pub use error::{Result, StoreError};
pub use gateway::{
    ChangeFilter, ChangeKind, ChangeStream, Gateway, Realtime, RowChange, SubscriptionId,
};
pub use local::LocalBackend;
pub use messages::{conversation_filter, MessageStore};
pub use models::{Comment, FriendStatus, Friendship, Like, Message, Post, Profile};
pub use query::{Embed, Filter, Order, Row, Select, Table};
pub use rest::{RestConfig, RestGateway};
pub use schema::timestamp_string;
pub use social::SocialStore;
pub use storage::DeviceStorage;
