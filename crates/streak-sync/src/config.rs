//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default, so an embedding app can start the engine
//! with zero configuration against a local server.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use streak_shared::constants::{
    CURRENT_CAPABILITY_VERSION, DEFAULT_HTTP_PORT, DEFAULT_NETWORK_TIMEOUT_SECS,
    LEADERBOARD_RESULT_CAP, OUTBOX_BACKOFF_BASE_SECS, OUTBOX_BACKOFF_CAP_SECS, OUTBOX_MAX_ATTEMPTS,
    SHARE_CONFIRM_TIMEOUT_SECS, SHARE_POLL_INTERVAL_MILLIS,
};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the backend server.
    /// Env: `STREAK_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// SQLite file for the outbox and caches. `None` uses the platform
    /// data directory.
    /// Env: `STREAK_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Upper bound on any single backend call.
    /// Env: `STREAK_NETWORK_TIMEOUT_SECS`
    pub network_timeout: Duration,

    /// Env: `STREAK_OUTBOX_BACKOFF_BASE_SECS`
    pub backoff_base: Duration,

    /// Env: `STREAK_OUTBOX_BACKOFF_CAP_SECS`
    pub backoff_cap: Duration,

    /// Attempts before an outbox entry is parked as needing attention.
    /// Env: `STREAK_OUTBOX_MAX_ATTEMPTS`
    pub max_attempts: u32,

    /// Most records one leaderboard fetch will rank.
    /// Env: `STREAK_LEADERBOARD_CAP`
    pub leaderboard_cap: usize,

    /// Restrict the user to one group at a time.
    /// Env: `STREAK_SINGLE_GROUP_MODE` (true/false)
    /// Default: `true`
    pub single_group_mode: bool,

    /// Share links created under an older version are recreated.
    /// Env: `STREAK_CAPABILITY_VERSION`
    pub capability_version: String,

    /// How long to wait for a share deletion to become visible.
    /// Env: `STREAK_SHARE_CONFIRM_TIMEOUT_SECS`
    pub share_confirm_timeout: Duration,

    /// Env: `STREAK_SHARE_POLL_MILLIS`
    pub share_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            db_path: None,
            network_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            backoff_base: Duration::from_secs(OUTBOX_BACKOFF_BASE_SECS),
            backoff_cap: Duration::from_secs(OUTBOX_BACKOFF_CAP_SECS),
            max_attempts: OUTBOX_MAX_ATTEMPTS,
            leaderboard_cap: LEADERBOARD_RESULT_CAP,
            single_group_mode: true,
            capability_version: CURRENT_CAPABILITY_VERSION.to_string(),
            share_confirm_timeout: Duration::from_secs(SHARE_CONFIRM_TIMEOUT_SECS),
            share_poll_interval: Duration::from_millis(SHARE_POLL_INTERVAL_MILLIS),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("STREAK_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(path) = std::env::var("STREAK_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = parse_var::<u64>("STREAK_NETWORK_TIMEOUT_SECS") {
            config.network_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("STREAK_OUTBOX_BACKOFF_BASE_SECS") {
            config.backoff_base = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("STREAK_OUTBOX_BACKOFF_CAP_SECS") {
            config.backoff_cap = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>("STREAK_OUTBOX_MAX_ATTEMPTS") {
            config.max_attempts = n.max(1);
        }
        if let Some(n) = parse_var::<usize>("STREAK_LEADERBOARD_CAP") {
            config.leaderboard_cap = n;
        }
        if let Some(flag) = parse_var::<bool>("STREAK_SINGLE_GROUP_MODE") {
            config.single_group_mode = flag;
        }
        if let Ok(version) = std::env::var("STREAK_CAPABILITY_VERSION") {
            config.capability_version = version;
        }
        if let Some(secs) = parse_var::<u64>("STREAK_SHARE_CONFIRM_TIMEOUT_SECS") {
            config.share_confirm_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>("STREAK_SHARE_POLL_MILLIS") {
            config.share_poll_interval = Duration::from_millis(ms.max(1));
        }

        config
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
