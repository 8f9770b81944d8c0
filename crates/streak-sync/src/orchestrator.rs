//! Reacts to app lifecycle triggers by flushing the outbox, healing stale
//! reader sets and refreshing or invalidating leaderboard pages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use streak_shared::{DateInt, SocialGroup, SyncResult};

use crate::events::{emit_event, SyncEvent};
use crate::groups::GroupManager;
use crate::invite_links::InviteLinkManager;
use crate::leaderboard::Leaderboard;
use crate::local::LocalStore;
use crate::outbox::{DrainReport, Outbox};
use crate::publisher::{PublishOutcome, ScorePublisher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    AppForegrounded,
    /// The backend signalled new data for a group.
    RemoteChange { group_id: Uuid },
    /// Cancel in-flight drains and fetches at their next checkpoint.
    AppSuspended,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    groups: GroupManager,
    publisher: ScorePublisher,
    outbox: Outbox,
    leaderboard: Leaderboard,
    links: InviteLinkManager,
    store: LocalStore,
    events: broadcast::Sender<SyncEvent>,
    cancel: Arc<StdMutex<CancellationToken>>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        groups: GroupManager,
        publisher: ScorePublisher,
        outbox: Outbox,
        leaderboard: Leaderboard,
        links: InviteLinkManager,
        store: LocalStore,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            groups,
            publisher,
            outbox,
            leaderboard,
            links,
            store,
            events,
            cancel: Arc::new(StdMutex::new(CancellationToken::new())),
        }
    }

    pub async fn handle(&self, trigger: SyncTrigger) -> SyncResult<()> {
        debug!(?trigger, "Handling sync trigger");
        match trigger {
            SyncTrigger::ConnectivityRestored => {
                self.flush_outbox().await?;
            }
            SyncTrigger::AppForegrounded => self.on_foreground().await?,
            SyncTrigger::RemoteChange { group_id } => {
                let dropped = self.leaderboard.invalidate(group_id).await;
                debug!(%group_id, dropped, "Leaderboard invalidated");
                emit_event(&self.events, SyncEvent::LeaderboardInvalidated { group_id });
            }
            SyncTrigger::AppSuspended => self.suspend(),
        }
        Ok(())
    }

    /// Process triggers until the sender side closes.
    ///
    /// Triggers are handled one at a time. `AppSuspended` is acted on
    /// immediately, even mid-flush; anything else arriving meanwhile waits
    /// its turn, with duplicates collapsed.
    pub async fn run(self, mut rx: mpsc::Receiver<SyncTrigger>) {
        info!("Sync orchestrator started");
        let mut backlog: VecDeque<SyncTrigger> = VecDeque::new();
        let mut open = true;

        loop {
            let trigger = match backlog.pop_front() {
                Some(t) => t,
                None if open => match rx.recv().await {
                    Some(t) => t,
                    None => break,
                },
                None => break,
            };
            if trigger == SyncTrigger::AppSuspended {
                self.suspend();
                continue;
            }

            let work = self.handle(trigger.clone());
            tokio::pin!(work);
            loop {
                tokio::select! {
                    res = &mut work => {
                        if let Err(e) = res {
                            warn!(?trigger, error = %e, "Sync trigger failed");
                        }
                        break;
                    }
                    next = rx.recv(), if open => match next {
                        Some(SyncTrigger::AppSuspended) => self.suspend(),
                        Some(other) => {
                            if !backlog.contains(&other) {
                                backlog.push_back(other);
                            }
                        }
                        None => open = false,
                    },
                }
            }
        }
        info!("Sync orchestrator stopped");
    }

    /// Replay queued leaves, then publish what the outbox holds.
    pub async fn flush_outbox(&self) -> SyncResult<DrainReport> {
        match self.groups.replay_pending_leaves().await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "Replayed pending leaves"),
            Err(e) => warn!(error = %e, "Could not replay pending leaves"),
        }

        let token = self.current_token();
        let publisher = self.publisher.clone();
        let report = self
            .outbox
            .drain(&token, move |record| {
                let publisher = publisher.clone();
                async move { publisher.deliver_queued(record).await }
            })
            .await?;

        for parked in &report.failed {
            emit_event(
                &self.events,
                SyncEvent::OutboxNeedsAttention {
                    record_id: parked.record_id.clone(),
                    reason: parked.reason.clone(),
                },
            );
        }
        Ok(report)
    }

    async fn on_foreground(&self) -> SyncResult<()> {
        let Some(group_id) = self.groups.active_group_id()? else {
            debug!("No active group, nothing to refresh");
            return Ok(());
        };
        let token = self.current_token();

        let group = match self.groups.refresh_group(group_id).await {
            Ok(group) if group.is_member(self.groups.user()) => group,
            Ok(_) => return Ok(()),
            Err(e) if e.is_transient() => match self.groups.active_group()? {
                Some(cached) => cached,
                None => return Ok(()),
            },
            Err(e) => return Err(e),
        };

        let healed = self.heal_readers(&group).await?;
        if healed > 0 {
            emit_event(&self.events, SyncEvent::RecordsHealed { group_id, count: healed });
        }

        let today = DateInt::today();
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Leaderboard refresh cancelled");
                return Ok(());
            }
            res = self.leaderboard.refresh(group_id, Some(today), None) => res,
        };
        match fetched {
            Ok(page) => emit_event(
                &self.events,
                SyncEvent::LeaderboardRefreshed {
                    group_id,
                    date_int: today,
                    entries: page.len(),
                },
            ),
            Err(e) => warn!(%group_id, error = %e, "Leaderboard refresh failed"),
        }

        if let Err(e) = self.links.ensure_share_link(group_id).await {
            warn!(%group_id, error = %e, "Could not refresh share link");
        }
        Ok(())
    }

    /// Re-publish own records that members who joined later cannot read yet.
    ///
    /// Readers are only added and `updated_at` is kept, so records written
    /// before someone left stay readable by them and rankings do not move.
    async fn heal_readers(&self, group: &SocialGroup) -> SyncResult<usize> {
        let me = self.groups.user().clone();
        let stale: Vec<_> = self
            .store
            .with(|db| db.cached_scores_for_group(group.id))?
            .into_iter()
            .filter(|c| c.record.user_id == me && c.record.lacks_readers_from(group))
            .collect();

        let mut healed = 0;
        for cached in stale {
            let record = cached.record.with_readers_added(group);
            match self.publisher.publish_record(record).await? {
                PublishOutcome::Published { .. } | PublishOutcome::Queued(_) => healed += 1,
                PublishOutcome::Rejected { record, reason } => {
                    warn!(record_id = %record.id, error = %reason, "Could not heal reader set");
                }
                PublishOutcome::LocalOnly(_) => {}
            }
        }
        if healed > 0 {
            info!(group_id = %group.id, healed, "Healed stale reader sets");
        }
        Ok(healed)
    }

    fn suspend(&self) {
        let mut guard = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.cancel();
        *guard = CancellationToken::new();
        info!("Suspended: in-flight sync cancelled");
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{NaiveDate, Utc};
    use streak_shared::{GameId, GameResult, UserId};
    use streak_store::OutboxStatus;

    use crate::backend::{Backend, MemoryBackend};
    use crate::config::SyncConfig;
    use crate::session::SyncSession;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn session(backend: &MemoryBackend, id: &str) -> SyncSession {
        SyncSession::with_store(
            SyncConfig::default(),
            user(id),
            Arc::new(backend.clone()),
            LocalStore::open_in_memory().unwrap(),
        )
        .unwrap()
    }

    fn today_result(score: u32) -> GameResult {
        GameResult {
            game_id: GameId::new("wordle").unwrap(),
            game_name: "Wordle".into(),
            date: Utc::now().date_naive(),
            score: Some(score),
            max_attempts: 6,
            completed: true,
            current_streak: 1,
        }
    }

    #[tokio::test]
    async fn connectivity_restored_flushes_outbox() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        alice.groups().create_group("Crew").await.unwrap();

        backend.set_offline(true);
        let queued = alice.record_result(&today_result(3)).await.unwrap();
        assert!(matches!(queued, PublishOutcome::Queued(_)));

        backend.set_offline(false);
        alice
            .orchestrator()
            .handle(SyncTrigger::ConnectivityRestored)
            .await
            .unwrap();

        assert!(alice.outbox().is_empty().unwrap());
        let id = queued.record().id.clone();
        assert!(backend.inspect(|c| c.score(&id).is_some()).await);
    }

    #[tokio::test]
    async fn replay_after_leaving_needs_attention() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        let mut events = alice.subscribe();
        let group = alice.groups().create_group("Crew").await.unwrap();

        backend.set_offline(true);
        alice.record_result(&today_result(3)).await.unwrap();
        alice.groups().leave_group(group.id).await.unwrap();
        backend.set_offline(false);

        let report = alice.orchestrator().flush_outbox().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(alice.outbox().needs_attention().unwrap().len(), 1);

        let mut saw_attention = false;
        while let Ok(event) = events.try_recv() {
            saw_attention |= matches!(event, SyncEvent::OutboxNeedsAttention { .. });
        }
        assert!(saw_attention);
    }

    #[tokio::test]
    async fn foreground_heals_stale_readers_and_refreshes() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        let bob = session(&backend, "bob");
        let group = alice.groups().create_group("Crew").await.unwrap();
        let published = alice.record_result(&today_result(3)).await.unwrap();
        let id = published.record().id.clone();

        bob.groups()
            .join_group(group.join_code.unwrap().as_str())
            .await
            .unwrap();

        let mut events = alice.subscribe();
        alice
            .orchestrator()
            .handle(SyncTrigger::AppForegrounded)
            .await
            .unwrap();

        let stored = backend.inspect(|c| c.score(&id).cloned()).await.unwrap();
        assert!(stored.allowed_readers.contains(&user("bob")));
        assert_eq!(stored.allowed_readers.len(), 2);

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&crate::events::EVENT_RECORDS_HEALED));
        assert!(names.contains(&crate::events::EVENT_LEADERBOARD_REFRESHED));
        assert_eq!(backend.inspect(|c| c.live_share_count(group.id)).await, 1);
    }

    #[tokio::test]
    async fn foreground_keeps_departed_member_as_reader() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        let bob = session(&backend, "bob");
        let group = alice.groups().create_group("Crew").await.unwrap();
        bob.groups()
            .join_group(group.join_code.unwrap().as_str())
            .await
            .unwrap();
        alice.groups().refresh_group(group.id).await.unwrap();

        let published = alice.record_result(&today_result(3)).await.unwrap();
        let id = published.record().id.clone();
        assert!(published.record().allowed_readers.contains(&user("bob")));
        let writes = backend.upsert_log().len();

        bob.groups().leave_group(group.id).await.unwrap();
        alice
            .orchestrator()
            .handle(SyncTrigger::AppForegrounded)
            .await
            .unwrap();

        let stored = backend.inspect(|c| c.score(&id).cloned()).await.unwrap();
        assert_eq!(&stored, published.record());
        assert!(stored.allowed_readers.contains(&user("bob")));
        assert_eq!(backend.upsert_log().len(), writes);
    }

    #[tokio::test]
    async fn healing_keeps_submission_order() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        let bob = session(&backend, "bob");
        let group = alice.groups().create_group("Crew").await.unwrap();
        let first = alice.record_result(&today_result(3)).await.unwrap();

        bob.groups()
            .join_group(group.join_code.unwrap().as_str())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        bob.record_result(&today_result(3)).await.unwrap();

        alice
            .orchestrator()
            .handle(SyncTrigger::AppForegrounded)
            .await
            .unwrap();

        let id = first.record().id.clone();
        let stored = backend.inspect(|c| c.score(&id).cloned()).await.unwrap();
        assert!(stored.allowed_readers.contains(&user("bob")));
        assert_eq!(stored.updated_at, first.record().updated_at);

        let page = alice
            .leaderboard()
            .fetch(group.id, Some(DateInt::today()), None)
            .await
            .unwrap();
        let order: Vec<_> = page.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn remote_change_invalidates_pages() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        let group = alice.groups().create_group("Crew").await.unwrap();
        alice.record_result(&today_result(3)).await.unwrap();
        alice.leaderboard().fetch(group.id, None, None).await.unwrap();

        let mut events = alice.subscribe();
        alice
            .orchestrator()
            .handle(SyncTrigger::RemoteChange { group_id: group.id })
            .await
            .unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            SyncEvent::LeaderboardInvalidated { group_id: group.id }
        );
        assert_eq!(alice.leaderboard().invalidate(group.id).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_cancels_running_flush() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        alice.groups().create_group("Crew").await.unwrap();
        backend.set_offline(true);
        alice.record_result(&today_result(3)).await.unwrap();
        backend.set_offline(false);
        backend.set_latency(Some(Duration::from_secs(5)));

        let orchestrator = alice.orchestrator().clone();
        let (report, _) = tokio::join!(orchestrator.flush_outbox(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            orchestrator.handle(SyncTrigger::AppSuspended).await
        });

        let report = report.unwrap();
        assert!(report.cancelled);
        let entry = &alice.outbox().entries().unwrap()[0];
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempt_count, 0);
    }

    #[tokio::test]
    async fn run_loop_processes_until_closed() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        alice.groups().create_group("Crew").await.unwrap();
        backend.set_offline(true);
        alice.record_result(&today_result(3)).await.unwrap();
        backend.set_offline(false);

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(alice.orchestrator().clone().run(rx));
        tx.send(SyncTrigger::ConnectivityRestored).await.unwrap();
        tx.send(SyncTrigger::ConnectivityRestored).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(alice.outbox().is_empty().unwrap());
        assert_eq!(backend.upsert_log().len(), 1);
    }

    #[tokio::test]
    async fn private_record_is_never_sent() {
        let backend = MemoryBackend::new();
        let alice = session(&backend, "alice");
        let result = GameResult {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            ..today_result(2)
        };
        let outcome = alice.record_result(&result).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::LocalOnly(_)));
        alice
            .orchestrator()
            .handle(SyncTrigger::ConnectivityRestored)
            .await
            .unwrap();
        assert!(backend.upsert_log().is_empty());
        assert!(backend.groups_for_member(&user("alice")).await.unwrap().is_empty());
    }
}
