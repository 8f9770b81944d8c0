//! The boundary between the sync engine and the hosted backend.
//!
//! The engine only ever talks to the backend through [`Backend`], so the
//! same components run against the reference HTTP server
//! ([`HttpBackend`]) or fully in process ([`MemoryBackend`]).
//!
//! Implementations report failures with the [`SyncError`] taxonomy:
//! network trouble is `Transient`, membership and permission violations
//! are `Permanent`, unknown codes and ids are `NotFound`, and racing
//! mutations are `Conflict`.
//!
//! [`SyncError`]: streak_shared::SyncError

pub mod http;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use streak_shared::protocol::{CreateGroupRequest, ScoreQuery, UpsertOutcome};
use streak_shared::{
    Friendship, JoinCode, ScoreRecord, ShareLink, SocialGroup, SyncError, SyncResult, UserId,
    UserProfile,
};

pub use http::HttpBackend;
pub use memory::MemoryBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    // --- scores ---

    /// Insert or overwrite the record stored under `record.id`.
    async fn upsert_score(
        &self,
        author: &UserId,
        record: &ScoreRecord,
    ) -> SyncResult<UpsertOutcome>;

    /// Records of one group that `reader` may read, oldest first.
    async fn query_scores(
        &self,
        reader: &UserId,
        query: &ScoreQuery,
    ) -> SyncResult<Vec<ScoreRecord>>;

    // --- groups ---

    async fn create_group(
        &self,
        creator: &UserId,
        req: CreateGroupRequest,
    ) -> SyncResult<SocialGroup>;

    async fn fetch_group(&self, caller: &UserId, group_id: Uuid) -> SyncResult<SocialGroup>;

    async fn find_group_by_code(&self, caller: &UserId, code: &JoinCode) -> SyncResult<SocialGroup>;

    /// Merge `user` into the group's member set.
    async fn add_member(&self, user: &UserId, group_id: Uuid) -> SyncResult<SocialGroup>;

    /// Remove `user` from the group's member set.
    async fn remove_member(&self, user: &UserId, group_id: Uuid) -> SyncResult<SocialGroup>;

    async fn groups_for_member(&self, user: &UserId) -> SyncResult<Vec<SocialGroup>>;

    // --- share links ---

    async fn fetch_share(&self, caller: &UserId, group_id: Uuid) -> SyncResult<Option<ShareLink>>;

    /// Create the group's share. `Conflict` while another one is live.
    async fn create_share(
        &self,
        caller: &UserId,
        group_id: Uuid,
        capability_version: &str,
    ) -> SyncResult<ShareLink>;

    /// Request deletion of the group's share. Deletion is only certain
    /// once [`Backend::share_exists`] reports `false`.
    async fn delete_share(&self, caller: &UserId, group_id: Uuid) -> SyncResult<()>;

    async fn share_exists(&self, caller: &UserId, group_id: Uuid) -> SyncResult<bool>;

    // --- profiles ---

    async fn register_profile(&self, profile: &UserProfile) -> SyncResult<()>;

    /// Profiles for the known ids among `ids`.
    async fn fetch_profiles(&self, caller: &UserId, ids: &[UserId]) -> SyncResult<Vec<UserProfile>>;

    // --- friendships ---

    async fn create_friendship(
        &self,
        requester: &UserId,
        recipient: &UserId,
    ) -> SyncResult<Friendship>;

    async fn fetch_friendship(&self, caller: &UserId, id: Uuid) -> SyncResult<Friendship>;

    async fn friendships_for(&self, caller: &UserId) -> SyncResult<Vec<Friendship>>;

    async fn accept_friendship(&self, caller: &UserId, id: Uuid) -> SyncResult<Friendship>;
}

/// Await a backend call for at most `limit`; running out of time is `Transient`.
pub async fn bounded<T>(
    limit: Duration,
    op: &str,
    fut: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(SyncError::Transient(format!("{op} timed out after {limit:?}"))),
    }
}
