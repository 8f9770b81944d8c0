//! Schema migrations, applied in order when a [`Database`] is opened.
//!
//! `PRAGMA user_version` records the last applied step, so each step runs
//! once per database file.
//!
//! [`Database`]: crate::Database

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered `(version, name, step)` list. Append only.
const STEPS: &[(u32, &str, Step)] = &[(1, "v001_initial", v001_initial::up)];

/// Bring the schema behind `conn` up to the newest version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = STEPS.last().map_or(0, |(v, _, _)| *v);
    if current >= target {
        tracing::debug!(version = current, "store schema up to date");
        return Ok(());
    }

    for (version, name, step) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(from = current, to = *version, migration = *name, "migrating store schema");
        step(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }
    Ok(())
}
