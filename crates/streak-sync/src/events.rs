use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use streak_shared::DateInt;

pub const EVENT_OUTBOX_NEEDS_ATTENTION: &str = "outbox-needs-attention";
pub const EVENT_LEADERBOARD_REFRESHED: &str = "leaderboard-refreshed";
pub const EVENT_LEADERBOARD_INVALIDATED: &str = "leaderboard-invalidated";
pub const EVENT_SHARE_LINK_RECREATED: &str = "share-link-recreated";
pub const EVENT_RECORDS_HEALED: &str = "records-healed";

/// Notifications the engine pushes to the embedding UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An outbox entry stopped retrying and is waiting on the user.
    OutboxNeedsAttention { record_id: String, reason: String },
    LeaderboardRefreshed { group_id: Uuid, date_int: DateInt, entries: usize },
    LeaderboardInvalidated { group_id: Uuid },
    ShareLinkRecreated { group_id: Uuid, url: String },
    /// Published records whose reader set was rewritten after a membership change.
    RecordsHealed { group_id: Uuid, count: usize },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::OutboxNeedsAttention { .. } => EVENT_OUTBOX_NEEDS_ATTENTION,
            SyncEvent::LeaderboardRefreshed { .. } => EVENT_LEADERBOARD_REFRESHED,
            SyncEvent::LeaderboardInvalidated { .. } => EVENT_LEADERBOARD_INVALIDATED,
            SyncEvent::ShareLinkRecreated { .. } => EVENT_SHARE_LINK_RECREATED,
            SyncEvent::RecordsHealed { .. } => EVENT_RECORDS_HEALED,
        }
    }
}

/// Broadcast `event`; having no subscriber is not an error.
pub fn emit_event(tx: &broadcast::Sender<SyncEvent>, event: SyncEvent) {
    let name = event.name();
    if tx.send(event).is_err() {
        tracing::trace!(event = name, "No subscriber for event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SyncEvent::LeaderboardInvalidated { group_id: Uuid::nil() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "leaderboard_invalidated");
        assert_eq!(event.name(), EVENT_LEADERBOARD_INVALIDATED);
    }
}
