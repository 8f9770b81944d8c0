//! In-process [`Backend`] over [`Collections`], with fault injection.
//!
//! Used by the engine's tests and for offline demos. Many users can share
//! one `MemoryBackend`: every call names its caller explicitly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use streak_shared::collections::Collections;
use streak_shared::protocol::{CreateGroupRequest, ScoreQuery, UpsertOutcome};
use streak_shared::{
    Friendship, JoinCode, ScoreRecord, ShareLink, SocialGroup, SyncError, SyncResult, UserId,
    UserProfile,
};

use super::Backend;

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    latency: Option<Duration>,
    scripted_upserts: VecDeque<SyncError>,
    /// Share deletions that stay visible for this many more polls.
    deletion_lag: HashMap<Uuid, u32>,
    pending_deletions: HashMap<Uuid, u32>,
    member_add_conflicts: usize,
    member_add_conflicts_land: bool,
    upsert_log: Vec<ScoreRecord>,
}

/// Shared, cloneable in-memory backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<RwLock<Collections>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `Transient`.
    pub fn set_offline(&self, offline: bool) {
        self.with_faults(|f| f.offline = offline);
    }

    /// Delay every call by `latency` before it is served.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.with_faults(|f| f.latency = latency);
    }

    /// The next score upserts fail with these errors, in order.
    pub fn fail_next_upserts(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.with_faults(|f| f.scripted_upserts.extend(errors));
    }

    /// The next `n` member adds report `Conflict`. With `landed` the merge
    /// is applied before the conflict is reported.
    pub fn conflict_next_member_adds(&self, n: usize, landed: bool) {
        self.with_faults(|f| {
            f.member_add_conflicts = n;
            f.member_add_conflicts_land = landed;
        });
    }

    /// After a delete request, the share keeps existing for `polls` more
    /// `share_exists` calls before the deletion lands.
    pub fn lag_share_deletion(&self, group_id: Uuid, polls: u32) {
        self.with_faults(|f| {
            f.deletion_lag.insert(group_id, polls);
        });
    }

    /// Every record that reached the backend's upsert path, in call order.
    pub fn upsert_log(&self) -> Vec<ScoreRecord> {
        self.with_faults(|f| f.upsert_log.clone())
    }

    /// Run `f` against the underlying collections (test inspection).
    pub async fn inspect<T>(&self, f: impl FnOnce(&Collections) -> T) -> T {
        let collections = self.collections.read().await;
        f(&collections)
    }

    /// Run `f` with write access (test setup).
    pub async fn mutate<T>(&self, f: impl FnOnce(&mut Collections) -> T) -> T {
        let mut collections = self.collections.write().await;
        f(&mut collections)
    }

    fn with_faults<T>(&self, f: impl FnOnce(&mut Faults) -> T) -> T {
        let mut guard = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    async fn gate(&self, op: &str) -> SyncResult<()> {
        let (offline, latency) = self.with_faults(|f| (f.offline, f.latency));
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if offline {
            debug!(op, "memory backend offline");
            return Err(SyncError::Transient(format!("{op}: backend unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn upsert_score(
        &self,
        author: &UserId,
        record: &ScoreRecord,
    ) -> SyncResult<UpsertOutcome> {
        self.gate("upsert_score").await?;
        let scripted = self.with_faults(|f| {
            f.upsert_log.push(record.clone());
            f.scripted_upserts.pop_front()
        });
        if let Some(err) = scripted {
            return Err(err);
        }
        self.collections
            .write()
            .await
            .upsert_score(author, record.clone())
    }

    async fn query_scores(
        &self,
        reader: &UserId,
        query: &ScoreQuery,
    ) -> SyncResult<Vec<ScoreRecord>> {
        self.gate("query_scores").await?;
        Ok(self.collections.read().await.query_scores(reader, query))
    }

    async fn create_group(
        &self,
        creator: &UserId,
        req: CreateGroupRequest,
    ) -> SyncResult<SocialGroup> {
        self.gate("create_group").await?;
        self.collections.write().await.create_group(creator, req)
    }

    async fn fetch_group(&self, _caller: &UserId, group_id: Uuid) -> SyncResult<SocialGroup> {
        self.gate("fetch_group").await?;
        self.collections.read().await.group(group_id)
    }

    async fn find_group_by_code(
        &self,
        _caller: &UserId,
        code: &JoinCode,
    ) -> SyncResult<SocialGroup> {
        self.gate("find_group_by_code").await?;
        self.collections.read().await.group_by_code(code)
    }

    async fn add_member(&self, user: &UserId, group_id: Uuid) -> SyncResult<SocialGroup> {
        self.gate("add_member").await?;
        let conflict = self.with_faults(|f| {
            if f.member_add_conflicts == 0 {
                return None;
            }
            f.member_add_conflicts -= 1;
            Some(f.member_add_conflicts_land)
        });
        match conflict {
            None => self.collections.write().await.add_member(group_id, user),
            Some(landed) => {
                if landed {
                    self.collections.write().await.add_member(group_id, user)?;
                }
                Err(SyncError::Conflict(format!("membership of {group_id} changed concurrently")))
            }
        }
    }

    async fn remove_member(&self, user: &UserId, group_id: Uuid) -> SyncResult<SocialGroup> {
        self.gate("remove_member").await?;
        self.collections.write().await.remove_member(group_id, user)
    }

    async fn groups_for_member(&self, user: &UserId) -> SyncResult<Vec<SocialGroup>> {
        self.gate("groups_for_member").await?;
        Ok(self.collections.read().await.groups_for_member(user))
    }

    async fn fetch_share(&self, _caller: &UserId, group_id: Uuid) -> SyncResult<Option<ShareLink>> {
        self.gate("fetch_share").await?;
        Ok(self.collections.read().await.share(group_id))
    }

    async fn create_share(
        &self,
        caller: &UserId,
        group_id: Uuid,
        capability_version: &str,
    ) -> SyncResult<ShareLink> {
        self.gate("create_share").await?;
        self.collections
            .write()
            .await
            .create_share(caller, group_id, capability_version)
    }

    async fn delete_share(&self, caller: &UserId, group_id: Uuid) -> SyncResult<()> {
        self.gate("delete_share").await?;
        let lag = self.with_faults(|f| {
            if f.pending_deletions.contains_key(&group_id) {
                // Repeated request for a deletion already propagating.
                return Some(None);
            }
            f.deletion_lag.remove(&group_id).map(Some)
        });
        match lag {
            Some(None) => Ok(()),
            Some(Some(polls)) => {
                self.with_faults(|f| {
                    f.pending_deletions.insert(group_id, polls);
                });
                Ok(())
            }
            None => self
                .collections
                .write()
                .await
                .delete_share(caller, group_id)
                .map(|_| ()),
        }
    }

    async fn share_exists(&self, caller: &UserId, group_id: Uuid) -> SyncResult<bool> {
        self.gate("share_exists").await?;
        let still_propagating = self.with_faults(|f| match f.pending_deletions.get_mut(&group_id) {
            Some(0) => {
                f.pending_deletions.remove(&group_id);
                Some(false)
            }
            Some(remaining) => {
                *remaining -= 1;
                Some(true)
            }
            None => None,
        });
        match still_propagating {
            Some(true) => Ok(true),
            Some(false) => {
                self.collections.write().await.delete_share(caller, group_id)?;
                Ok(false)
            }
            None => Ok(self.collections.read().await.share(group_id).is_some()),
        }
    }

    async fn register_profile(&self, profile: &UserProfile) -> SyncResult<()> {
        self.gate("register_profile").await?;
        self.collections.write().await.register_profile(profile.clone());
        Ok(())
    }

    async fn fetch_profiles(
        &self,
        _caller: &UserId,
        ids: &[UserId],
    ) -> SyncResult<Vec<UserProfile>> {
        self.gate("fetch_profiles").await?;
        Ok(self.collections.read().await.profiles(ids))
    }

    async fn create_friendship(
        &self,
        requester: &UserId,
        recipient: &UserId,
    ) -> SyncResult<Friendship> {
        self.gate("create_friendship").await?;
        self.collections
            .write()
            .await
            .create_friendship(requester, recipient)
    }

    async fn fetch_friendship(&self, caller: &UserId, id: Uuid) -> SyncResult<Friendship> {
        self.gate("fetch_friendship").await?;
        self.collections.read().await.friendship(caller, id)
    }

    async fn friendships_for(&self, caller: &UserId) -> SyncResult<Vec<Friendship>> {
        self.gate("friendships_for").await?;
        Ok(self.collections.read().await.friendships_for(caller))
    }

    async fn accept_friendship(&self, caller: &UserId, id: Uuid) -> SyncResult<Friendship> {
        self.gate("accept_friendship").await?;
        self.collections.write().await.accept_friendship(caller, id)
    }
}
