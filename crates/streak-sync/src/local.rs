//! Shared handle to the local durable store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use streak_shared::{SyncError, SyncResult};
use streak_store::Database;

/// Cloneable handle to the user's [`Database`].
///
/// The lock is only ever held for the duration of one synchronous closure,
/// never across an `.await`.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> SyncResult<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database, converting store errors.
    pub fn with<T>(&self, f: impl FnOnce(&Database) -> streak_store::Result<T>) -> SyncResult<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| SyncError::Storage("local store lock poisoned".into()))?;
        f(&db).map_err(SyncError::from)
    }
}
