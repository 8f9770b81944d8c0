//! Rows persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use streak_shared::ScoreRecord;

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Lifecycle of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for its next attempt.
    Pending,
    /// Handed to the publisher by a running drain.
    InFlight,
    /// Gave up retrying; needs attention from the user.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "in_flight" => Some(OutboxStatus::InFlight),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// A score record whose remote write has not been confirmed yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxEntry {
    pub record: ScoreRecord,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest moment the entry may be retried; `None` means now.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub last_error: Option<String>,
    /// FIFO position. Kept when a newer version replaces the entry.
    pub seq: i64,
    /// Bumped whenever the entry is replaced. Guards completions from
    /// clobbering a newer version enqueued mid-drain.
    pub revision: i64,
}

impl OutboxEntry {
    pub fn record_id(&self) -> &str {
        &self.record.id
    }
}

// ---------------------------------------------------------------------------
// Score cache
// ---------------------------------------------------------------------------

/// A locally built score record and whether the backend has confirmed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedScore {
    pub record: ScoreRecord,
    pub published: bool,
}

// ---------------------------------------------------------------------------
// Pending membership operations
// ---------------------------------------------------------------------------

/// A group the user left locally while the backend was unreachable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingLeave {
    pub group_id: Uuid,
    pub created_at: DateTime<Utc>,
}
