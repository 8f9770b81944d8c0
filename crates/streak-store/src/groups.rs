//! Cached groups, the active-group selection and queued leaves.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use streak_shared::SocialGroup;

use crate::database::{conversion_error, optional, Database};
use crate::error::Result;
use crate::models::PendingLeave;

const ACTIVE_GROUP_KEY: &str = "active_group_id";

impl Database {
    // ------------------------------------------------------------------
    // Group cache
    // ------------------------------------------------------------------

    pub fn cache_group(&self, group: &SocialGroup) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO groups (id, json, cached_at) VALUES (?1, ?2, ?3)",
            params![
                group.id.to_string(),
                serde_json::to_string(group)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Replace the whole cache with a fresh listing from the backend.
    pub fn replace_cached_groups(&self, groups: &[SocialGroup]) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM groups", [])?;
        let now = Utc::now().to_rfc3339();
        for group in groups {
            tx.execute(
                "INSERT INTO groups (id, json, cached_at) VALUES (?1, ?2, ?3)",
                params![group.id.to_string(), serde_json::to_string(group)?, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn cached_group(&self, id: Uuid) -> Result<Option<SocialGroup>> {
        optional(self.conn().query_row(
            "SELECT json FROM groups WHERE id = ?1",
            params![id.to_string()],
            row_to_group,
        ))
    }

    pub fn cached_groups(&self) -> Result<Vec<SocialGroup>> {
        let mut stmt = self.conn().prepare("SELECT json FROM groups")?;
        let rows = stmt.query_map([], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(groups)
    }

    pub fn remove_cached_group(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM groups WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Active group selection
    // ------------------------------------------------------------------

    pub fn active_group_id(&self) -> Result<Option<Uuid>> {
        let value: Option<String> = optional(self.conn().query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![ACTIVE_GROUP_KEY],
            |row| row.get(0),
        ))?;
        Ok(value.map(|v| Uuid::parse_str(&v)).transpose()?)
    }

    pub fn set_active_group_id(&self, id: Option<Uuid>) -> Result<()> {
        match id {
            Some(id) => self.conn().execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![ACTIVE_GROUP_KEY, id.to_string()],
            )?,
            None => self.conn().execute(
                "DELETE FROM settings WHERE key = ?1",
                params![ACTIVE_GROUP_KEY],
            )?,
        };
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pending leaves
    // ------------------------------------------------------------------

    pub fn queue_leave(&self, group_id: Uuid) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO pending_leaves (group_id, created_at) VALUES (?1, ?2)",
            params![group_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn pending_leaves(&self) -> Result<Vec<PendingLeave>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT group_id, created_at FROM pending_leaves ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let created_str: String = row.get(1)?;

            let group_id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;
            let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(1, e))?;
            Ok(PendingLeave { group_id, created_at })
        })?;

        let mut leaves = Vec::new();
        for row in rows {
            leaves.push(row?);
        }
        Ok(leaves)
    }

    pub fn clear_pending_leave(&self, group_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM pending_leaves WHERE group_id = ?1",
            params![group_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<SocialGroup> {
    let json: String = row.get(0)?;
    serde_json::from_str(&json).map_err(|e| conversion_error(0, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streak_shared::UserId;

    fn group(name: &str) -> SocialGroup {
        SocialGroup::new(name, UserId::new("alice").unwrap())
    }

    #[test]
    fn active_group_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.active_group_id().unwrap(), None);

        let id = Uuid::new_v4();
        db.set_active_group_id(Some(id)).unwrap();
        assert_eq!(db.active_group_id().unwrap(), Some(id));

        db.set_active_group_id(None).unwrap();
        assert_eq!(db.active_group_id().unwrap(), None);
    }

    #[test]
    fn replace_drops_groups_no_longer_listed() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (group("a"), group("b"));
        db.cache_group(&a).unwrap();
        db.cache_group(&b).unwrap();

        db.replace_cached_groups(std::slice::from_ref(&b)).unwrap();
        assert!(db.cached_group(a.id).unwrap().is_none());
        assert_eq!(db.cached_groups().unwrap(), vec![b]);
    }

    #[test]
    fn pending_leaves_are_deduplicated() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.queue_leave(id).unwrap();
        db.queue_leave(id).unwrap();
        assert_eq!(db.pending_leaves().unwrap().len(), 1);

        assert!(db.clear_pending_leave(id).unwrap());
        assert!(db.pending_leaves().unwrap().is_empty());
    }
}
