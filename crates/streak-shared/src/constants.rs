/// Application name
pub const APP_NAME: &str = "Streak Share";

/// Length of a human-typable join code
pub const JOIN_CODE_LEN: usize = 6;

/// Characters used when generating join codes (no 0/O or 1/I look-alikes)
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Deep-link prefix for group invites: `app://join?code=<code>`
pub const DEEP_LINK_PREFIX: &str = "app://join";

/// HTTP header carrying the caller's stable user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Default bound on a single publish/fetch round trip, in seconds
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 10;

/// Outbox exponential backoff base, in seconds
pub const OUTBOX_BACKOFF_BASE_SECS: u64 = 2;

/// Outbox backoff ceiling, in seconds (5 minutes)
pub const OUTBOX_BACKOFF_CAP_SECS: u64 = 300;

/// Attempts before an outbox entry is parked as needing attention
pub const OUTBOX_MAX_ATTEMPTS: u32 = 10;

/// Upper bound on records held by one leaderboard page
pub const LEADERBOARD_RESULT_CAP: usize = 500;

/// Minimum client capability a freshly created share link advertises
pub const CURRENT_CAPABILITY_VERSION: &str = "2";

/// How long share-deletion confirmation may take before giving up, in seconds
pub const SHARE_CONFIRM_TIMEOUT_SECS: u64 = 5;

/// Interval between share-deletion confirmation polls, in milliseconds
pub const SHARE_POLL_INTERVAL_MILLIS: u64 = 250;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
