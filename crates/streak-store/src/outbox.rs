//! Persistence for [`OutboxEntry`] rows.
//!
//! Every state change after enqueue is guarded by the row's `revision`, so
//! a drain that started on an older version can never overwrite or delete a
//! newer one enqueued in the meantime.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;

use streak_shared::ScoreRecord;

use crate::database::{conversion_error, optional, Database};
use crate::error::{Result, StoreError};
use crate::models::{OutboxEntry, OutboxStatus};

const SELECT_COLUMNS: &str = "SELECT record_json, attempt_count, last_attempt_at, next_attempt_at,
        status, last_error, seq, revision
 FROM outbox";

impl Database {
    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Insert `record`, or replace the queued version with the same id.
    ///
    /// A replaced entry keeps its FIFO position but starts over: attempts
    /// reset, status back to pending, revision bumped.
    pub fn enqueue_outbox(&self, record: &ScoreRecord) -> Result<OutboxEntry> {
        let json = serde_json::to_string(record)?;
        self.conn().execute(
            "INSERT INTO outbox (record_id, user_id, record_json, attempt_count, status, seq, revision)
             VALUES (?1, ?2, ?3, 0, 'pending', (SELECT COALESCE(MAX(seq), 0) + 1 FROM outbox), 1)
             ON CONFLICT(record_id) DO UPDATE SET
                 record_json     = excluded.record_json,
                 attempt_count   = 0,
                 last_attempt_at = NULL,
                 next_attempt_at = NULL,
                 status          = 'pending',
                 last_error      = NULL,
                 revision        = outbox.revision + 1",
            params![record.id, record.user_id.as_str(), json],
        )?;
        self.outbox_entry(&record.id)?.ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn outbox_entry(&self, record_id: &str) -> Result<Option<OutboxEntry>> {
        optional(self.conn().query_row(
            &format!("{SELECT_COLUMNS} WHERE record_id = ?1"),
            params![record_id],
            row_to_entry,
        ))
    }

    /// Every entry, oldest first.
    pub fn list_outbox(&self) -> Result<Vec<OutboxEntry>> {
        self.query_outbox(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"), params![])
    }

    /// Pending entries whose backoff has elapsed, oldest first.
    pub fn due_outbox(&self, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>> {
        self.query_outbox(
            &format!(
                "{SELECT_COLUMNS}
                 WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                 ORDER BY seq ASC"
            ),
            params![now.timestamp_millis()],
        )
    }

    /// Entries parked as needing attention, oldest first.
    pub fn failed_outbox(&self) -> Result<Vec<OutboxEntry>> {
        self.query_outbox(
            &format!("{SELECT_COLUMNS} WHERE status = 'failed' ORDER BY seq ASC"),
            params![],
        )
    }

    pub fn outbox_len(&self) -> Result<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn query_outbox(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(args, row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Transitions (revision-guarded)
    // ------------------------------------------------------------------

    /// `pending -> in_flight`. Returns `false` if the row moved on.
    pub fn mark_outbox_in_flight(&self, record_id: &str, revision: i64) -> Result<bool> {
        self.transition(
            "UPDATE outbox SET status = 'in_flight'
             WHERE record_id = ?1 AND revision = ?2 AND status = 'pending'",
            params![record_id, revision],
        )
    }

    /// Remove an entry whose write the backend confirmed.
    pub fn complete_outbox(&self, record_id: &str, revision: i64) -> Result<bool> {
        self.transition(
            "DELETE FROM outbox WHERE record_id = ?1 AND revision = ?2",
            params![record_id, revision],
        )
    }

    /// Back to pending after a failed attempt, eligible again at `next_attempt_at`.
    pub fn reschedule_outbox(
        &self,
        record_id: &str,
        revision: i64,
        attempt_count: u32,
        attempted_at: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        self.transition(
            "UPDATE outbox SET status = 'pending', attempt_count = ?3, last_attempt_at = ?4,
                 next_attempt_at = ?5, last_error = ?6
             WHERE record_id = ?1 AND revision = ?2",
            params![
                record_id,
                revision,
                attempt_count,
                attempted_at.timestamp_millis(),
                next_attempt_at.timestamp_millis(),
                error,
            ],
        )
    }

    /// Park an entry as needing attention; drains skip it from now on.
    pub fn fail_outbox(
        &self,
        record_id: &str,
        revision: i64,
        attempt_count: u32,
        attempted_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        self.transition(
            "UPDATE outbox SET status = 'failed', attempt_count = ?3, last_attempt_at = ?4,
                 next_attempt_at = NULL, last_error = ?5
             WHERE record_id = ?1 AND revision = ?2",
            params![
                record_id,
                revision,
                attempt_count,
                attempted_at.timestamp_millis(),
                error,
            ],
        )
    }

    /// `in_flight -> pending` without counting an attempt (cancelled drain).
    pub fn release_outbox(&self, record_id: &str, revision: i64) -> Result<bool> {
        self.transition(
            "UPDATE outbox SET status = 'pending'
             WHERE record_id = ?1 AND revision = ?2 AND status = 'in_flight'",
            params![record_id, revision],
        )
    }

    /// Crash recovery: nothing can be in flight when the store is opened.
    pub fn reset_in_flight_outbox(&self) -> Result<usize> {
        let n = self
            .conn()
            .execute("UPDATE outbox SET status = 'pending' WHERE status = 'in_flight'", [])?;
        Ok(n)
    }

    /// Re-arm a failed entry for automatic retries.
    pub fn retry_outbox(&self, record_id: &str) -> Result<bool> {
        self.transition(
            "UPDATE outbox SET status = 'pending', attempt_count = 0, next_attempt_at = NULL
             WHERE record_id = ?1 AND status = 'failed'",
            params![record_id],
        )
    }

    /// Drop an entry for good.
    pub fn discard_outbox(&self, record_id: &str) -> Result<bool> {
        self.transition("DELETE FROM outbox WHERE record_id = ?1", params![record_id])
    }

    fn transition(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<bool> {
        let affected = self.conn().execute(sql, args)?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let json: String = row.get(0)?;
    let attempt_count: u32 = row.get(1)?;
    let last_attempt_at: Option<i64> = row.get(2)?;
    let next_attempt_at: Option<i64> = row.get(3)?;
    let status_str: String = row.get(4)?;
    let last_error: Option<String> = row.get(5)?;
    let seq: i64 = row.get(6)?;
    let revision: i64 = row.get(7)?;

    let record: ScoreRecord = serde_json::from_str(&json).map_err(|e| conversion_error(0, e))?;
    let status = OutboxStatus::parse(&status_str).ok_or_else(|| {
        conversion_error(4, StoreError::Migration(format!("unknown outbox status {status_str}")))
    })?;

    Ok(OutboxEntry {
        record,
        attempt_count,
        last_attempt_at: last_attempt_at.and_then(from_millis),
        next_attempt_at: next_attempt_at.and_then(from_millis),
        status,
        last_error,
        seq,
        revision,
    })
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use streak_shared::{GameId, GameResult, UserId};

    fn record(game: &str, score: u32) -> ScoreRecord {
        let result = GameResult {
            game_id: GameId::new(game).unwrap(),
            game_name: game.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            score: Some(score),
            max_attempts: 6,
            completed: true,
            current_streak: 1,
        };
        ScoreRecord::build(&UserId::new("alice").unwrap(), &result, None, Utc::now()).unwrap()
    }

    #[test]
    fn enqueue_replaces_same_id() {
        let db = Database::open_in_memory().unwrap();
        let first = db.enqueue_outbox(&record("wordle", 3)).unwrap();
        db.enqueue_outbox(&record("connections", 4)).unwrap();
        let replaced = db.enqueue_outbox(&record("wordle", 2)).unwrap();

        assert_eq!(db.outbox_len().unwrap(), 2);
        assert_eq!(replaced.record.score, Some(2));
        assert_eq!(replaced.seq, first.seq, "replacement keeps its FIFO slot");
        assert_eq!(replaced.revision, first.revision + 1);

        let order: Vec<_> = db
            .list_outbox()
            .unwrap()
            .into_iter()
            .map(|e| e.record.game_id.to_string())
            .collect();
        assert_eq!(order, vec!["wordle", "connections"]);
    }

    #[test]
    fn stale_revision_cannot_complete() {
        let db = Database::open_in_memory().unwrap();
        let old = db.enqueue_outbox(&record("wordle", 3)).unwrap();
        assert!(db.mark_outbox_in_flight(old.record_id(), old.revision).unwrap());

        // A corrected score arrives while the old one is in flight.
        db.enqueue_outbox(&record("wordle", 2)).unwrap();

        assert!(!db.complete_outbox(old.record_id(), old.revision).unwrap());
        let survivor = db.outbox_entry(old.record_id()).unwrap().unwrap();
        assert_eq!(survivor.record.score, Some(2));
        assert_eq!(survivor.status, OutboxStatus::Pending);
    }

    #[test]
    fn backoff_hides_entry_until_due() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let e = db.enqueue_outbox(&record("wordle", 3)).unwrap();
        db.reschedule_outbox(
            e.record_id(),
            e.revision,
            1,
            now,
            now + Duration::seconds(2),
            "offline",
        )
            .unwrap();

        assert!(db.due_outbox(now).unwrap().is_empty());
        let due = db.due_outbox(now + Duration::seconds(3)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt_count, 1);
        assert_eq!(due[0].last_error.as_deref(), Some("offline"));
    }

    #[test]
    fn failed_entries_surface_and_can_be_retried() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let e = db.enqueue_outbox(&record("wordle", 3)).unwrap();
        db.fail_outbox(e.record_id(), e.revision, 10, now, "left group").unwrap();

        assert!(db.due_outbox(now).unwrap().is_empty());
        assert_eq!(db.failed_outbox().unwrap().len(), 1);

        assert!(db.retry_outbox(e.record_id()).unwrap());
        let due = db.due_outbox(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt_count, 0);
    }

    #[test]
    fn in_flight_rows_reset_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.db");
        {
            let db = Database::open_at(&path).unwrap();
            let e = db.enqueue_outbox(&record("wordle", 3)).unwrap();
            db.mark_outbox_in_flight(e.record_id(), e.revision).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.reset_in_flight_outbox().unwrap(), 1);
        assert_eq!(db.due_outbox(Utc::now()).unwrap().len(), 1);
    }
}
