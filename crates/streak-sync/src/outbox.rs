//! Durable queue of score records whose remote write is still owed.
//!
//! Entries are keyed by record id, so enqueuing a newer version of the same
//! record replaces the queued one instead of adding a second write. A drain
//! hands due entries to a publish function oldest first and applies the
//! retry policy to whatever fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use streak_shared::{ScoreRecord, SyncError, SyncResult};
use streak_store::OutboxEntry;

use crate::config::SyncConfig;
use crate::local::LocalStore;

/// Exponential backoff: `base * 2^(attempt - 1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base: config.backoff_base,
            cap: config.backoff_cap,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the next try, after `attempt` failed attempts.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// An entry that stopped retrying during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedEntry {
    pub record_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub published: usize,
    pub rescheduled: usize,
    pub failed: Vec<ParkedEntry>,
    /// Rows left in the outbox after the drain, failed ones included.
    pub remaining: usize,
    pub cancelled: bool,
    /// Another drain was already running; nothing was done.
    pub skipped: bool,
}

#[derive(Clone)]
pub struct Outbox {
    store: LocalStore,
    policy: RetryPolicy,
    drain_lock: Arc<Mutex<()>>,
}

impl Outbox {
    pub fn new(store: LocalStore, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Queue `record`, replacing any queued version with the same id.
    pub fn enqueue(&self, record: &ScoreRecord) -> SyncResult<OutboxEntry> {
        let entry = self.store.with(|db| db.enqueue_outbox(record))?;
        debug!(record_id = %record.id, revision = entry.revision, "Queued record in outbox");
        Ok(entry)
    }

    pub fn contains(&self, record_id: &str) -> SyncResult<bool> {
        Ok(self.store.with(|db| db.outbox_entry(record_id))?.is_some())
    }

    pub fn entries(&self) -> SyncResult<Vec<OutboxEntry>> {
        self.store.with(|db| db.list_outbox())
    }

    /// Entries that gave up retrying and wait for [`Outbox::retry`] or
    /// [`Outbox::discard`].
    pub fn needs_attention(&self) -> SyncResult<Vec<OutboxEntry>> {
        self.store.with(|db| db.failed_outbox())
    }

    pub fn retry(&self, record_id: &str) -> SyncResult<bool> {
        self.store.with(|db| db.retry_outbox(record_id))
    }

    pub fn discard(&self, record_id: &str) -> SyncResult<bool> {
        let removed = self.store.with(|db| db.discard_outbox(record_id))?;
        if removed {
            info!(record_id, "Discarded outbox entry");
        }
        Ok(removed)
    }

    pub fn len(&self) -> SyncResult<usize> {
        self.store.with(|db| db.outbox_len())
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Return rows left in flight by a previous process to pending.
    pub fn recover(&self) -> SyncResult<usize> {
        let n = self.store.with(|db| db.reset_in_flight_outbox())?;
        if n > 0 {
            info!(count = n, "Recovered in-flight outbox entries");
        }
        Ok(n)
    }

    /// Publish every due entry through `publish`, oldest first.
    ///
    /// Returns immediately with `skipped` set if another drain holds the
    /// lock. Cancelling `cancel` stops before the next entry and returns an
    /// interrupted one to pending without counting the attempt.
    pub async fn drain<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut publish: F,
    ) -> SyncResult<DrainReport>
    where
        F: FnMut(ScoreRecord) -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Outbox drain already running, skipping");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let mut report = DrainReport::default();
        let due = self.store.with(|db| db.due_outbox(Utc::now()))?;
        debug!(due = due.len(), "Draining outbox");

        for entry in due {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let id = entry.record.id.clone();
            let revision = entry.revision;
            if !self.store.with(|db| db.mark_outbox_in_flight(&id, revision))? {
                // Replaced since the due list was read; the next drain takes it.
                continue;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = publish(entry.record.clone()) => Some(res),
            };

            match outcome {
                None => {
                    self.store.with(|db| db.release_outbox(&id, revision))?;
                    report.cancelled = true;
                    break;
                }
                Some(Ok(())) => {
                    if self.store.with(|db| db.complete_outbox(&id, revision))? {
                        report.published += 1;
                    }
                }
                Some(Err(err)) => self.settle_failure(&entry, &err, &mut report)?,
            }
        }

        report.remaining = self.len()?;
        if report.published > 0 || !report.failed.is_empty() {
            info!(
                published = report.published,
                rescheduled = report.rescheduled,
                failed = report.failed.len(),
                remaining = report.remaining,
                "Outbox drain finished"
            );
        }
        Ok(report)
    }

    fn settle_failure(
        &self,
        entry: &OutboxEntry,
        err: &SyncError,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        let id = entry.record_id();
        let attempts = entry.attempt_count + 1;
        let now = Utc::now();
        let reason = err.to_string();

        if !is_retryable(err) || attempts >= self.policy.max_attempts {
            warn!(record_id = %id, attempts, error = %err, "Outbox entry needs attention");
            if self
                .store
                .with(|db| db.fail_outbox(id, entry.revision, attempts, now, &reason))?
            {
                report.failed.push(ParkedEntry {
                    record_id: id.to_string(),
                    reason,
                });
            }
            return Ok(());
        }

        let delay = self.policy.backoff_for(attempts);
        let next =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        debug!(
            record_id = %id,
            attempts,
            delay_secs = delay.as_secs(),
            error = %err,
            "Rescheduling outbox entry"
        );
        if self
            .store
            .with(|db| db.reschedule_outbox(id, entry.revision, attempts, now, next, &reason))?
        {
            report.rescheduled += 1;
        }
        Ok(())
    }
}

fn is_retryable(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::Transient(_) | SyncError::Conflict(_) | SyncError::Storage(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use chrono::NaiveDate;
    use streak_shared::{GameId, GameResult, UserId};
    use streak_store::OutboxStatus;
    use tokio::sync::{mpsc, Notify};

    fn record(game: &str, day: u32, score: u32) -> ScoreRecord {
        let result = GameResult {
            game_id: GameId::new(game).unwrap(),
            game_name: game.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            score: Some(score),
            max_attempts: 6,
            completed: true,
            current_streak: 1,
        };
        ScoreRecord::build(&UserId::new("alice").unwrap(), &result, None, Utc::now()).unwrap()
    }

    fn outbox() -> Outbox {
        Outbox::new(LocalStore::open_in_memory().unwrap(), RetryPolicy::default())
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(32));
        assert_eq!(policy.backoff_for(9), Duration::from_secs(300));
        assert_eq!(policy.backoff_for(60), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn coalesced_record_is_published_once() {
        let outbox = outbox();
        outbox.enqueue(&record("wordle", 1, 3)).unwrap();
        outbox.enqueue(&record("wordle", 1, 2)).unwrap();

        let seen = StdMutex::new(Vec::new());
        let report = outbox
            .drain(&CancellationToken::new(), |r| {
                seen.lock().unwrap().push(r.score);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(2)]);
        assert!(outbox.is_empty().unwrap());
    }

    #[tokio::test]
    async fn five_writes_to_three_ids_publish_three_times() {
        let outbox = outbox();
        for (game, day, score) in [
            ("wordle", 1, 4),
            ("connections", 1, 2),
            ("wordle", 1, 3),
            ("wordle", 2, 5),
            ("connections", 1, 1),
        ] {
            outbox.enqueue(&record(game, day, score)).unwrap();
        }

        let seen = StdMutex::new(Vec::new());
        let report = outbox
            .drain(&CancellationToken::new(), |r| {
                seen.lock().unwrap().push((r.id.clone(), r.score));
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(report.published, 3);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].1, Some(3), "first slot holds the latest wordle score");
        assert_eq!(seen[1].1, Some(1));
        assert_eq!(seen[2].1, Some(5));
    }

    #[tokio::test]
    async fn transient_failure_reschedules_with_backoff() {
        let outbox = outbox();
        let rec = record("wordle", 1, 3);
        outbox.enqueue(&rec).unwrap();

        let report = outbox
            .drain(&CancellationToken::new(), |_| async {
                Err(SyncError::Transient("offline".into()))
            })
            .await
            .unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.remaining, 1);

        let entry = &outbox.entries().unwrap()[0];
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert!(entry.next_attempt_at.unwrap() > Utc::now());

        // Not due yet, so a second drain publishes nothing.
        let again = outbox
            .drain(&CancellationToken::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(again.published, 0);
    }

    #[tokio::test]
    async fn permanent_failure_needs_attention() {
        let outbox = outbox();
        let rec = record("wordle", 1, 3);
        outbox.enqueue(&rec).unwrap();

        let report = outbox
            .drain(&CancellationToken::new(), |_| async {
                Err(SyncError::Permanent("not a member".into()))
            })
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].record_id, rec.id);
        assert_eq!(outbox.needs_attention().unwrap().len(), 1);

        assert!(outbox.retry(&rec.id).unwrap());
        assert!(outbox.needs_attention().unwrap().is_empty());
        assert!(outbox.discard(&rec.id).unwrap());
        assert!(outbox.is_empty().unwrap());
    }

    #[tokio::test]
    async fn last_allowed_attempt_parks_entry() {
        let store = LocalStore::open_in_memory().unwrap();
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let outbox = Outbox::new(store, policy);
        outbox.enqueue(&record("wordle", 1, 3)).unwrap();

        let report = outbox
            .drain(&CancellationToken::new(), |_| async {
                Err(SyncError::Transient("offline".into()))
            })
            .await
            .unwrap();
        assert_eq!(report.rescheduled, 0);
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_drain_is_a_no_op() {
        let outbox = outbox();
        outbox.enqueue(&record("wordle", 1, 3)).unwrap();

        let release = Arc::new(Notify::new());
        let (started_tx, mut started_rx) = mpsc::channel::<()>(1);

        let first = {
            let outbox = outbox.clone();
            let release = release.clone();
            tokio::spawn(async move {
                outbox
                    .drain(&CancellationToken::new(), move |_| {
                        let started = started_tx.clone();
                        let release = release.clone();
                        async move {
                            let _ = started.send(()).await;
                            release.notified().await;
                            Ok(())
                        }
                    })
                    .await
            })
        };

        started_rx.recv().await.unwrap();
        let second = outbox
            .drain(&CancellationToken::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(second.skipped);
        assert_eq!(second.published, 0);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.published, 1);
    }

    #[tokio::test]
    async fn cancelled_drain_releases_entry() {
        let outbox = outbox();
        outbox.enqueue(&record("wordle", 1, 3)).unwrap();
        let cancel = CancellationToken::new();

        let report = outbox
            .drain(&cancel, |_| {
                cancel.cancel();
                std::future::pending::<SyncResult<()>>()
            })
            .await
            .unwrap();

        assert!(report.cancelled);
        let entry = &outbox.entries().unwrap()[0];
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempt_count, 0);
    }

    #[tokio::test]
    async fn recover_resets_in_flight_rows() {
        let store = LocalStore::open_in_memory().unwrap();
        let outbox = Outbox::new(store.clone(), RetryPolicy::default());
        let entry = outbox.enqueue(&record("wordle", 1, 3)).unwrap();
        store
            .with(|db| db.mark_outbox_in_flight(entry.record_id(), entry.revision))
            .unwrap();

        assert_eq!(outbox.recover().unwrap(), 1);
        let report = outbox
            .drain(&CancellationToken::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(report.published, 1);
    }
}
