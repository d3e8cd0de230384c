//! # circle-client
//!
//! Client-side state for Circle: chat sessions with optimistic sends,
//! realtime subscriptions, the notification feed, the chat list and the
//! badge counters, wired together by [`state::AppState`].

pub mod badges;
pub mod config;
pub mod error;
pub mod events;
pub mod inbox;
pub mod notifications;
pub mod realtime;
pub mod scheduler;
pub mod session;
pub mod state;

pub use error::{ClientError, Result};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.  `RUST_LOG` overrides the default
/// filter.  Calling this more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("circle_client=debug,circle_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
