//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero
//! configuration against a local backend.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use circle_shared::constants::{DEFAULT_POLL_INTERVAL_SECS, MAX_MESSAGE_CHARS};

use crate::notifications::FanOut;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL of the backend.
    /// Env: `CIRCLE_BACKEND_URL`
    /// Default: `http://localhost:54321`
    pub backend_url: String,

    /// Public anon key.
    /// Env: `CIRCLE_API_KEY`
    /// Default: empty
    pub api_key: String,

    /// How often badge counters are refreshed.
    /// Env: `CIRCLE_POLL_INTERVAL_SECS`
    /// Default: 30 seconds
    pub poll_interval: Duration,

    /// Directory for device storage.  `None` means the platform data dir.
    /// Env: `CIRCLE_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// How notification sources are fetched.
    /// Env: `CIRCLE_NOTIFICATION_FANOUT` (`per-post` / `batched`)
    /// Default: `batched`
    pub notification_fanout: FanOut,

    /// Env: `CIRCLE_MAX_MESSAGE_CHARS`
    /// Default: 1000
    pub max_message_chars: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            data_dir: None,
            notification_fanout: FanOut::Batched,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CIRCLE_BACKEND_URL") {
            if url.trim().is_empty() {
                tracing::warn!("Empty CIRCLE_BACKEND_URL, using default");
            } else {
                config.backend_url = url;
            }
        }

        if let Some(key) = lookup("CIRCLE_API_KEY") {
            config.api_key = key;
        }

        if let Some(val) = lookup("CIRCLE_POLL_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid CIRCLE_POLL_INTERVAL_SECS, using default"),
            }
        }

        if let Some(dir) = lookup("CIRCLE_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(val) = lookup("CIRCLE_NOTIFICATION_FANOUT") {
            match val.parse::<FanOut>() {
                Ok(mode) => config.notification_fanout = mode,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid CIRCLE_NOTIFICATION_FANOUT, using default"),
            }
        }

        if let Some(val) = lookup("CIRCLE_MAX_MESSAGE_CHARS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_chars = n,
                _ => tracing::warn!(value = %val, "Invalid CIRCLE_MAX_MESSAGE_CHARS, using default"),
            }
        }

        config
    }

    /// `data_dir`, or the platform data directory when unset.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(|| {
            ProjectDirs::from("com", "circle", "circle").map(|d| d.data_dir().to_path_buf())
        })
    }
}
