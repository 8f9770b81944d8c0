//! Local cache of every score record the user produced.

use rusqlite::params;
use uuid::Uuid;

use streak_shared::ScoreRecord;

use crate::database::{conversion_error, optional, Database};
use crate::error::Result;
use crate::models::CachedScore;

impl Database {
    /// Insert or overwrite the cached version of `record`.
    pub fn cache_score(&self, record: &ScoreRecord, published: bool) -> Result<()> {
        self.conn().execute(
            "INSERT INTO scores (id, user_id, group_id, date_int, record_json, published, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 group_id    = excluded.group_id,
                 date_int    = excluded.date_int,
                 record_json = excluded.record_json,
                 published   = excluded.published,
                 updated_at  = excluded.updated_at",
            params![
                record.id,
                record.user_id.as_str(),
                record.group_id.map(|g| g.to_string()),
                record.date_int.value(),
                serde_json::to_string(record)?,
                published,
                record.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Mark `record` as confirmed by the backend, unless a newer local
    /// version has replaced it in the meantime.
    pub fn mark_score_published(&self, record: &ScoreRecord) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE scores SET published = 1, record_json = ?2, group_id = ?3, updated_at = ?4
             WHERE id = ?1 AND updated_at <= ?4",
            params![
                record.id,
                serde_json::to_string(record)?,
                record.group_id.map(|g| g.to_string()),
                record.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn cached_score(&self, id: &str) -> Result<Option<CachedScore>> {
        optional(self.conn().query_row(
            "SELECT record_json, published FROM scores WHERE id = ?1",
            params![id],
            row_to_cached,
        ))
    }

    /// Cached records written into `group_id`, newest day first.
    pub fn cached_scores_for_group(&self, group_id: Uuid) -> Result<Vec<CachedScore>> {
        let mut stmt = self.conn().prepare(
            "SELECT record_json, published FROM scores
             WHERE group_id = ?1
             ORDER BY date_int DESC, id ASC",
        )?;
        let rows = stmt.query_map(params![group_id.to_string()], row_to_cached)?;

        let mut scores = Vec::new();
        for row in rows {
            scores.push(row?);
        }
        Ok(scores)
    }
}

fn row_to_cached(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedScore> {
    let json: String = row.get(0)?;
    let published: bool = row.get(1)?;
    let record: ScoreRecord = serde_json::from_str(&json).map_err(|e| conversion_error(0, e))?;
    Ok(CachedScore { record, published })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};
    use streak_shared::{GameId, GameResult, SocialGroup, UserId};

    fn record(group: Option<&SocialGroup>, score: u32) -> ScoreRecord {
        let result = GameResult {
            game_id: GameId::new("wordle").unwrap(),
            game_name: "Wordle".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            score: Some(score),
            max_attempts: 6,
            completed: true,
            current_streak: 3,
        };
        ScoreRecord::build(&UserId::new("alice").unwrap(), &result, group, Utc::now()).unwrap()
    }

    #[test]
    fn cache_overwrites_by_id() {
        let db = Database::open_in_memory().unwrap();
        db.cache_score(&record(None, 4), false).unwrap();
        let newer = record(None, 3);
        db.cache_score(&newer, true).unwrap();

        let cached = db.cached_score(&newer.id).unwrap().unwrap();
        assert_eq!(cached.record.score, Some(3));
        assert!(cached.published);
    }

    #[test]
    fn publish_mark_skips_newer_local_version() {
        let db = Database::open_in_memory().unwrap();
        let mut old = record(None, 4);
        old.updated_at = Utc::now() - Duration::minutes(5);
        let newer = record(None, 2);
        db.cache_score(&newer, false).unwrap();

        assert!(!db.mark_score_published(&old).unwrap());
        let cached = db.cached_score(&newer.id).unwrap().unwrap();
        assert_eq!(cached.record.score, Some(2));
        assert!(!cached.published);

        assert!(db.mark_score_published(&newer).unwrap());
        assert!(db.cached_score(&newer.id).unwrap().unwrap().published);
    }

    #[test]
    fn scores_listed_per_group() {
        let db = Database::open_in_memory().unwrap();
        let group = SocialGroup::new("crew", UserId::new("alice").unwrap());
        db.cache_score(&record(Some(&group), 3), true).unwrap();

        assert_eq!(db.cached_scores_for_group(group.id).unwrap().len(), 1);
        assert!(db.cached_scores_for_group(Uuid::new_v4()).unwrap().is_empty());
    }
}
