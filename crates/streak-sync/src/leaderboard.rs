//! Ranked views over the score records a group has published.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use streak_shared::protocol::ScoreQuery;
use streak_shared::{DateInt, GameId, ScoreRecord, SyncResult, UserId};

use crate::backend::{bounded, Backend};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    group_id: Uuid,
    date_int: Option<DateInt>,
    game_id: Option<GameId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    /// 1-based position.
    pub rank: usize,
    pub record: ScoreRecord,
}

/// One game's ranking within a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameStandings {
    pub game_id: GameId,
    pub game_name: String,
    pub entries: Vec<RankedEntry>,
}

#[derive(Clone)]
pub struct Leaderboard {
    user: UserId,
    backend: Arc<dyn Backend>,
    cap: usize,
    timeout: Duration,
    pages: Arc<RwLock<HashMap<PageKey, Vec<ScoreRecord>>>>,
}

impl Leaderboard {
    pub fn new(user: UserId, backend: Arc<dyn Backend>, cap: usize, timeout: Duration) -> Self {
        Self {
            user,
            backend,
            cap,
            timeout,
            pages: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ranked records of `group_id` the caller may read, optionally for
    /// one day and/or one game. Served from cache until invalidated.
    pub async fn fetch(
        &self,
        group_id: Uuid,
        date_int: Option<DateInt>,
        game_id: Option<&GameId>,
    ) -> SyncResult<Vec<ScoreRecord>> {
        let key = PageKey {
            group_id,
            date_int,
            game_id: game_id.cloned(),
        };
        if let Some(page) = self.pages.read().await.get(&key) {
            return Ok(page.clone());
        }
        self.load(key).await
    }

    /// Like [`Leaderboard::fetch`], always going to the backend.
    pub async fn refresh(
        &self,
        group_id: Uuid,
        date_int: Option<DateInt>,
        game_id: Option<&GameId>,
    ) -> SyncResult<Vec<ScoreRecord>> {
        self.load(PageKey {
            group_id,
            date_int,
            game_id: game_id.cloned(),
        })
        .await
    }

    /// Per-game standings for one day.
    pub async fn standings(
        &self,
        group_id: Uuid,
        date_int: DateInt,
    ) -> SyncResult<Vec<GameStandings>> {
        let records = self.fetch(group_id, Some(date_int), None).await?;
        Ok(group_by_game(records))
    }

    /// Drop every cached page of `group_id`. Returns how many were dropped.
    pub async fn invalidate(&self, group_id: Uuid) -> usize {
        let mut pages = self.pages.write().await;
        let before = pages.len();
        pages.retain(|key, _| key.group_id != group_id);
        before - pages.len()
    }

    async fn load(&self, key: PageKey) -> SyncResult<Vec<ScoreRecord>> {
        let query = ScoreQuery {
            group_id: key.group_id,
            date_int: key.date_int,
            game_id: key.game_id.clone(),
            limit: Some(self.cap),
        };
        let fetched = bounded(
            self.timeout,
            "query_scores",
            self.backend.query_scores(&self.user, &query),
        )
        .await?;

        let page = prepare_page(&self.user, fetched, self.cap);
        debug!(group_id = %key.group_id, records = page.len(), "Leaderboard page loaded");
        self.pages.write().await.insert(key, page.clone());
        Ok(page)
    }
}

/// Keep what `reader` may read, bounded to the `cap` newest, ranked.
fn prepare_page(reader: &UserId, records: Vec<ScoreRecord>, cap: usize) -> Vec<ScoreRecord> {
    let mut visible: Vec<ScoreRecord> = records
        .into_iter()
        .filter(|r| r.allowed_readers.contains(reader))
        .collect();

    if visible.len() > cap {
        visible.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        let excess = visible.len() - cap;
        visible.drain(..excess);
    }

    rank(&mut visible);
    visible
}

/// Completed before not completed, then fewest attempts, then earliest
/// submission. Stable, so equal records keep their fetch order.
pub fn rank(records: &mut [ScoreRecord]) {
    records.sort_by(compare);
}

fn compare(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    b.completed
        .cmp(&a.completed)
        .then_with(|| match (a.score, b.score) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.updated_at.cmp(&b.updated_at))
}

fn group_by_game(records: Vec<ScoreRecord>) -> Vec<GameStandings> {
    let mut by_game: BTreeMap<GameId, GameStandings> = BTreeMap::new();
    for record in records {
        let standings = by_game
            .entry(record.game_id.clone())
            .or_insert_with(|| GameStandings {
                game_id: record.game_id.clone(),
                game_name: record.game_name.clone(),
                entries: Vec::new(),
            });
        let rank = standings.entries.len() + 1;
        standings.entries.push(RankedEntry { rank, record });
    }
    by_game.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
    use streak_shared::protocol::CreateGroupRequest;
    use streak_shared::{GameResult, JoinCode, SocialGroup};

    use crate::backend::MemoryBackend;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn record(
        author: &str,
        group: &SocialGroup,
        score: Option<u32>,
        completed: bool,
        age_secs: i64,
    ) -> ScoreRecord {
        let result = GameResult {
            game_id: GameId::new("wordle").unwrap(),
            game_name: "Wordle".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            score,
            max_attempts: 6,
            completed,
            current_streak: 1,
        };
        let at = Utc::now() - ChronoDuration::seconds(age_secs);
        ScoreRecord::build(&user(author), &result, Some(group), at).unwrap()
    }

    async fn crew(backend: &MemoryBackend) -> SocialGroup {
        let mut group = backend
            .create_group(
                &user("alice"),
                CreateGroupRequest {
                    id: Uuid::new_v4(),
                    name: "crew".into(),
                    join_code: JoinCode::generate(),
                },
            )
            .await
            .unwrap();
        for m in ["bob", "carol"] {
            group = backend.add_member(&user(m), group.id).await.unwrap();
        }
        group
    }

    #[test]
    fn ranking_puts_failures_last() {
        let group = SocialGroup::new("crew", user("alice"));
        let mut records = vec![
            record("alice", &group, Some(3), true, 30),
            record("bob", &group, None, false, 40),
            record("carol", &group, Some(2), true, 10),
        ];
        rank(&mut records);

        let order: Vec<_> = records.iter().map(|r| (r.score, r.completed)).collect();
        assert_eq!(order, vec![(Some(2), true), (Some(3), true), (None, false)]);
    }

    #[test]
    fn ties_go_to_earlier_submission() {
        let group = SocialGroup::new("crew", user("alice"));
        let mut records = vec![
            record("alice", &group, Some(4), true, 5),
            record("bob", &group, Some(4), true, 50),
        ];
        rank(&mut records);
        assert_eq!(records[0].user_id, user("bob"));
    }

    #[test]
    fn incomplete_with_low_score_still_ranks_last() {
        let group = SocialGroup::new("crew", user("alice"));
        let mut records = vec![
            record("alice", &group, Some(1), false, 5),
            record("bob", &group, Some(6), true, 5),
        ];
        rank(&mut records);
        assert_eq!(records[0].user_id, user("bob"));
    }

    #[test]
    fn page_filters_unreadable_and_truncates_oldest() {
        let mut group = SocialGroup::new("crew", user("alice"));
        group.members.insert(user("bob"));
        let private = SocialGroup::new("solo", user("mallory"));

        let records = vec![
            record("alice", &group, Some(5), true, 300),
            record("bob", &group, Some(4), true, 200),
            record("mallory", &private, Some(1), true, 100),
            record("alice", &group, Some(3), true, 10),
        ];
        let page = prepare_page(&user("bob"), records, 2);

        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|r| r.allowed_readers.contains(&user("bob"))));
        assert_eq!(page[0].score, Some(3));
        assert_eq!(page[1].score, Some(4));
    }

    #[tokio::test]
    async fn fetch_caches_until_invalidated() {
        let backend = MemoryBackend::new();
        let group = crew(&backend).await;
        let board = Leaderboard::new(
            user("alice"),
            Arc::new(backend.clone()),
            500,
            Duration::from_secs(10),
        );

        let first = record("bob", &group, Some(3), true, 10);
        backend.upsert_score(&user("bob"), &first).await.unwrap();
        let date = first.date_int;
        assert_eq!(board.fetch(group.id, Some(date), None).await.unwrap().len(), 1);

        let second = record("carol", &group, Some(2), true, 5);
        backend.upsert_score(&user("carol"), &second).await.unwrap();
        assert_eq!(board.fetch(group.id, Some(date), None).await.unwrap().len(), 1);

        assert_eq!(board.invalidate(group.id).await, 1);
        let page = board.fetch(group.id, Some(date), None).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].user_id, user("carol"));
    }

    #[tokio::test]
    async fn standings_group_by_game() {
        let backend = MemoryBackend::new();
        let group = crew(&backend).await;
        let board = Leaderboard::new(
            user("alice"),
            Arc::new(backend.clone()),
            500,
            Duration::from_secs(10),
        );

        let a = record("alice", &group, Some(4), true, 20);
        let b = record("bob", &group, Some(2), true, 10);
        backend.upsert_score(&user("alice"), &a).await.unwrap();
        backend.upsert_score(&user("bob"), &b).await.unwrap();

        let standings = board.standings(group.id, a.date_int).await.unwrap();
        assert_eq!(standings.len(), 1);
        assert_eq!(standings[0].entries[0].rank, 1);
        assert_eq!(standings[0].entries[0].record.user_id, user("bob"));
        assert_eq!(standings[0].entries[1].rank, 2);
    }
}
