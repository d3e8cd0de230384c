/// Application name
pub const APP_NAME: &str = "Circle";

/// Maximum length of a direct message, in characters
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Prefix carried by locally generated message identifiers
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Two rows whose timestamps differ by less than this are considered the
/// same logical message when matching a pending send against an echo.
pub const RECONCILE_WINDOW_SECS: i64 = 120;

/// Tab badges render "99+" beyond this value
pub const BADGE_CAP: u64 = 99;

/// Per-conversation badges in the chat list render "9+" beyond this value
pub const CHAT_LIST_BADGE_CAP: u64 = 9;

/// Number of characters of the last message shown in the chat list
pub const PREVIEW_CHARS: usize = 50;

/// Default polling period for unread / notification badges
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Device storage key for the notifications last-seen watermark
pub const NOTIFICATIONS_LAST_SEEN_KEY: &str = "notifications_last_seen";

/// Server-side procedure flipping `seen` on a conversation direction
pub const RPC_MARK_MESSAGES_SEEN: &str = "mark_messages_as_seen";

/// Realtime channel prefix for a conversation pair
pub const CONVERSATION_CHANNEL_PREFIX: &str = "messages";

/// Realtime channel prefix for a user's inbox
pub const INCOMING_CHANNEL_PREFIX: &str = "incoming-messages";
