//! Turns a local game result into its canonical [`ScoreRecord`] and writes
//! it to the backend, falling back to the outbox when the write cannot be
//! confirmed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use streak_shared::protocol::UpsertOutcome;
use streak_shared::{GameResult, ScoreRecord, SocialGroup, SyncError, SyncResult, UserId};

use crate::backend::{bounded, Backend};
use crate::local::LocalStore;
use crate::outbox::Outbox;

/// What happened to a published result.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// The backend holds this version. `written` is false when the same
    /// content had already been confirmed and no request was sent.
    Published { record: ScoreRecord, written: bool },
    /// No active group: kept locally, readable by its author only.
    LocalOnly(ScoreRecord),
    /// The write could not be confirmed; the outbox will retry it.
    Queued(ScoreRecord),
    /// The backend refused the write for good. Not queued.
    Rejected { record: ScoreRecord, reason: SyncError },
}

impl PublishOutcome {
    pub fn record(&self) -> &ScoreRecord {
        match self {
            PublishOutcome::Published { record, .. }
            | PublishOutcome::LocalOnly(record)
            | PublishOutcome::Queued(record)
            | PublishOutcome::Rejected { record, .. } => record,
        }
    }
}

#[derive(Clone)]
pub struct ScorePublisher {
    user: UserId,
    backend: Arc<dyn Backend>,
    store: LocalStore,
    outbox: Outbox,
    timeout: Duration,
}

impl ScorePublisher {
    pub fn new(
        user: UserId,
        backend: Arc<dyn Backend>,
        store: LocalStore,
        outbox: Outbox,
        timeout: Duration,
    ) -> Self {
        Self {
            user,
            backend,
            store,
            outbox,
            timeout,
        }
    }

    /// Build the record for `result` and publish it into `active_group`.
    ///
    /// Only malformed results and local storage failures are returned as
    /// errors; every backend failure is folded into the outcome.
    pub async fn publish(
        &self,
        result: &GameResult,
        active_group: Option<&SocialGroup>,
    ) -> SyncResult<PublishOutcome> {
        let record = ScoreRecord::build(&self.user, result, active_group, Utc::now())?;
        self.publish_record(record).await
    }

    /// Publish an already built record (also used to re-target stale
    /// reader sets).
    pub async fn publish_record(&self, record: ScoreRecord) -> SyncResult<PublishOutcome> {
        if record.group_id.is_none() {
            self.store.with(|db| db.cache_score(&record, false))?;
            debug!(record_id = %record.id, "Stored private record");
            return Ok(PublishOutcome::LocalOnly(record));
        }

        let cached = self.store.with(|db| db.cached_score(&record.id))?;
        if let Some(cached) = cached {
            if cached.published && cached.record.same_content(&record) {
                debug!(record_id = %record.id, "Record unchanged, skipping write");
                return Ok(PublishOutcome::Published {
                    record: cached.record,
                    written: false,
                });
            }
        }

        self.store.with(|db| db.cache_score(&record, false))?;

        // An older version is still queued: replace it so the two can
        // never land out of order.
        if self.outbox.contains(&record.id)? {
            self.outbox.enqueue(&record)?;
            return Ok(PublishOutcome::Queued(record));
        }

        match self.push(&record).await {
            Ok(outcome) => {
                self.store.with(|db| db.mark_score_published(&record))?;
                info!(record_id = %record.id, ?outcome, "Published score");
                Ok(PublishOutcome::Published {
                    record,
                    written: outcome != UpsertOutcome::Unchanged,
                })
            }
            Err(err) if is_deferrable(&err) => {
                debug!(record_id = %record.id, error = %err, "Publish deferred to outbox");
                self.outbox.enqueue(&record)?;
                Ok(PublishOutcome::Queued(record))
            }
            Err(err) => {
                warn!(record_id = %record.id, error = %err, "Publish rejected");
                Ok(PublishOutcome::Rejected { record, reason: err })
            }
        }
    }

    /// One bounded upsert attempt. A timeout is reported as `Transient`.
    pub async fn push(&self, record: &ScoreRecord) -> SyncResult<UpsertOutcome> {
        bounded(self.timeout, "upsert_score", self.backend.upsert_score(&self.user, record)).await
    }

    /// Deliver a record taken from the outbox.
    ///
    /// Members who joined the cached group since the record was built are
    /// added as readers first, keeping the version stamp. Fails `Permanent`
    /// once the user is no longer a member.
    pub async fn deliver_queued(&self, record: ScoreRecord) -> SyncResult<()> {
        let Some(group_id) = record.group_id else {
            return Err(SyncError::Permanent(format!("{} has no group", record.id)));
        };
        let group = self.store.with(|db| db.cached_group(group_id))?;
        let record = match group {
            Some(group) if group.is_member(&self.user) => record.with_readers_added(&group),
            _ => {
                return Err(SyncError::Permanent(format!(
                    "{} is no longer a member of group {group_id}",
                    self.user
                )))
            }
        };

        self.push(&record).await?;
        self.store.with(|db| db.mark_score_published(&record))?;
        Ok(())
    }
}

fn is_deferrable(err: &SyncError) -> bool {
    matches!(err, SyncError::Transient(_) | SyncError::Conflict(_))
}
