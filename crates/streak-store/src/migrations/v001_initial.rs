//! v001 -- Initial schema creation.
//!
//! Creates the outbox, the local score cache, the group cache, the settings
//! table and the queue of membership operations awaiting the backend.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Outbox: score records awaiting a confirmed remote write
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS outbox (
    record_id       TEXT PRIMARY KEY NOT NULL,  -- deterministic score id
    user_id         TEXT NOT NULL,
    record_json     TEXT NOT NULL,              -- serialized ScoreRecord
    attempt_count   INTEGER NOT NULL DEFAULT 0,
    last_attempt_at INTEGER,                    -- unix millis
    next_attempt_at INTEGER,                    -- unix millis, NULL = due now
    status          TEXT NOT NULL,              -- pending | in_flight | failed
    last_error      TEXT,
    seq             INTEGER NOT NULL,           -- FIFO position
    revision        INTEGER NOT NULL DEFAULT 1  -- bumped on every replace
);

CREATE INDEX IF NOT EXISTS idx_outbox_status_seq ON outbox(status, seq);

-- ----------------------------------------------------------------
-- Local score cache
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS scores (
    id          TEXT PRIMARY KEY NOT NULL,
    user_id     TEXT NOT NULL,
    group_id    TEXT,                           -- NULL = private record
    date_int    INTEGER NOT NULL,
    record_json TEXT NOT NULL,
    published   INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    updated_at  INTEGER NOT NULL                -- unix millis
);

CREATE INDEX IF NOT EXISTS idx_scores_group_date ON scores(group_id, date_int DESC);

-- ----------------------------------------------------------------
-- Cached groups the user belongs to
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    json       TEXT NOT NULL,                   -- serialized SocialGroup
    cached_at  TEXT NOT NULL                    -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Key/value settings (active group selection, ...)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Membership removals not yet acknowledged by the backend
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_leaves (
    group_id   TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
