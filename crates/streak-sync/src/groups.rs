//! Group membership for the signed-in user: create, join, leave, list and
//! the persisted active-group selection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use streak_shared::invite::parse_join_input;
use streak_shared::protocol::CreateGroupRequest;
use streak_shared::{JoinCode, ShareLink, SocialGroup, SyncError, SyncResult, UserId};

use crate::backend::{bounded, Backend};
use crate::config::SyncConfig;
use crate::local::LocalStore;

const CREATE_ATTEMPTS: usize = 5;
const JOIN_ATTEMPTS: usize = 3;

/// Policy switches for group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPolicy {
    /// At most one group per account; joining or creating a second one
    /// fails with `FeatureDisabled`.
    pub single_group_mode: bool,
}

impl GroupPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            single_group_mode: config.single_group_mode,
        }
    }
}

#[derive(Clone)]
pub struct GroupManager {
    user: UserId,
    backend: Arc<dyn Backend>,
    store: LocalStore,
    policy: GroupPolicy,
    timeout: Duration,
    /// Serializes this user's membership mutations.
    mutation_lock: Arc<Mutex<()>>,
}

impl GroupManager {
    pub fn new(
        user: UserId,
        backend: Arc<dyn Backend>,
        store: LocalStore,
        policy: GroupPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            user,
            backend,
            store,
            policy,
            timeout,
            mutation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create a group with the caller as sole member and make it active.
    pub async fn create_group(&self, name: &str) -> SyncResult<SocialGroup> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidInput("group name must not be empty".into()));
        }

        let _guard = self.mutation_lock.lock().await;
        self.check_single_group(None)?;

        let mut last_err = None;
        for _ in 0..CREATE_ATTEMPTS {
            let req = CreateGroupRequest {
                id: Uuid::new_v4(),
                name: name.to_string(),
                join_code: JoinCode::generate(),
            };
            let created = bounded(
                self.timeout,
                "create_group",
                self.backend.create_group(&self.user, req),
            )
            .await;
            match created {
                Ok(group) => {
                    self.adopt(&group)?;
                    info!(group_id = %group.id, "Created group");
                    return Ok(group);
                }
                Err(err @ SyncError::Conflict(_)) => {
                    debug!(error = %err, "Join code collision, regenerating");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err
            .unwrap_or_else(|| SyncError::Conflict("could not allocate a join code".into())))
    }

    /// Join the group behind a typed code or an `app://join` link and make
    /// it active. Joining a group the caller already belongs to succeeds.
    pub async fn join_group(&self, code_or_link: &str) -> SyncResult<SocialGroup> {
        let code = parse_join_input(code_or_link)?;

        let _guard = self.mutation_lock.lock().await;
        let group = bounded(
            self.timeout,
            "find_group_by_code",
            self.backend.find_group_by_code(&self.user, &code),
        )
        .await?;
        self.check_single_group(Some(group.id))?;

        if group.is_member(&self.user) {
            debug!(group_id = %group.id, "Already a member");
            self.adopt(&group)?;
            return Ok(group);
        }

        let group = self.add_self(group.id).await?;
        self.adopt(&group)?;
        info!(group_id = %group.id, members = group.members.len(), "Joined group");
        Ok(group)
    }

    /// Leave `group_id`. Records already written under the group are not
    /// touched. If the backend is unreachable the leave is queued and the
    /// group disappears locally right away.
    pub async fn leave_group(&self, group_id: Uuid) -> SyncResult<()> {
        let _guard = self.mutation_lock.lock().await;

        match bounded(
            self.timeout,
            "remove_member",
            self.backend.remove_member(&self.user, group_id),
        )
        .await
        {
            Ok(_) | Err(SyncError::NotFound(_)) => {}
            Err(err) if err.is_transient() => {
                warn!(%group_id, error = %err, "Leave queued until the backend is reachable");
                self.store.with(|db| db.queue_leave(group_id))?;
            }
            Err(err) => return Err(err),
        }

        self.forget(group_id)?;
        info!(%group_id, "Left group");
        Ok(())
    }

    /// Send the leaves queued while offline. Returns how many went through;
    /// a transient failure keeps the rest queued.
    pub async fn replay_pending_leaves(&self) -> SyncResult<usize> {
        let _guard = self.mutation_lock.lock().await;
        let pending = self.store.with(|db| db.pending_leaves())?;
        let mut replayed = 0;

        for leave in pending {
            match bounded(
                self.timeout,
                "remove_member",
                self.backend.remove_member(&self.user, leave.group_id),
            )
            .await
            {
                Ok(_) | Err(SyncError::NotFound(_)) | Err(SyncError::Permanent(_)) => {
                    self.store.with(|db| db.clear_pending_leave(leave.group_id))?;
                    replayed += 1;
                }
                Err(err) if err.is_transient() => {
                    debug!(group_id = %leave.group_id, error = %err, "Pending leave still blocked");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(replayed)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Groups the caller belongs to, minus those with a queued leave.
    /// Served from the local cache when the backend is unreachable.
    pub async fn list_groups(&self) -> SyncResult<Vec<SocialGroup>> {
        let fetched = bounded(
            self.timeout,
            "groups_for_member",
            self.backend.groups_for_member(&self.user),
        )
        .await;

        match fetched {
            Ok(groups) => {
                let pending: Vec<Uuid> = self
                    .store
                    .with(|db| db.pending_leaves())?
                    .into_iter()
                    .map(|l| l.group_id)
                    .collect();
                let groups: Vec<SocialGroup> = groups
                    .into_iter()
                    .filter(|g| !pending.contains(&g.id))
                    .collect();
                self.store.with(|db| db.replace_cached_groups(&groups))?;
                Ok(groups)
            }
            // Left groups were already dropped from the cache.
            Err(err) if err.is_transient() => {
                debug!(error = %err, "Listing groups from cache");
                self.store.with(|db| db.cached_groups())
            }
            Err(err) => Err(err),
        }
    }

    /// Fetch the latest version of `group_id` and update the cache.
    pub async fn refresh_group(&self, group_id: Uuid) -> SyncResult<SocialGroup> {
        let group = bounded(
            self.timeout,
            "fetch_group",
            self.backend.fetch_group(&self.user, group_id),
        )
        .await?;
        if group.is_member(&self.user) {
            self.store.with(|db| db.cache_group(&group))?;
        } else {
            debug!(%group_id, "No longer a member, dropping cached group");
            self.forget(group_id)?;
        }
        Ok(group)
    }

    pub fn active_group_id(&self) -> SyncResult<Option<Uuid>> {
        self.store.with(|db| db.active_group_id())
    }

    /// The active group as last cached.
    pub fn active_group(&self) -> SyncResult<Option<SocialGroup>> {
        let Some(id) = self.active_group_id()? else {
            return Ok(None);
        };
        self.store.with(|db| db.cached_group(id))
    }

    /// Switch the active group to one the caller belongs to, or clear it.
    pub fn set_active_group(&self, group_id: Option<Uuid>) -> SyncResult<()> {
        if let Some(id) = group_id {
            if self.store.with(|db| db.cached_group(id))?.is_none() {
                return Err(SyncError::NotFound(format!("not a member of group {id}")));
            }
        }
        self.store.with(|db| db.set_active_group_id(group_id))
    }

    /// Remember the group's current share link in the cache.
    pub fn record_share(&self, link: &ShareLink) -> SyncResult<()> {
        let cached = self.store.with(|db| db.cached_group(link.group_id))?;
        if let Some(mut group) = cached {
            group.share_reference = Some(link.clone());
            self.store.with(|db| db.cache_group(&group))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn check_single_group(&self, target: Option<Uuid>) -> SyncResult<()> {
        if !self.policy.single_group_mode {
            return Ok(());
        }
        match self.active_group_id()? {
            Some(active) if Some(active) != target => Err(SyncError::FeatureDisabled(format!(
                "single group mode: already in group {active}"
            ))),
            _ => Ok(()),
        }
    }

    /// `add_member` merges on the backend; a `Conflict` means another
    /// mutation raced ours and is retried. If every attempt conflicts the
    /// group is re-read: a merge that landed counts as joined, anything else
    /// is reported `Transient`.
    async fn add_self(&self, group_id: Uuid) -> SyncResult<SocialGroup> {
        for attempt in 1..=JOIN_ATTEMPTS {
            let added = bounded(
                self.timeout,
                "add_member",
                self.backend.add_member(&self.user, group_id),
            )
            .await;
            match added {
                Ok(group) => return Ok(group),
                Err(SyncError::Conflict(msg)) => debug!(%group_id, attempt, %msg, "Join raced"),
                Err(err) => return Err(err),
            }
        }

        let group = bounded(
            self.timeout,
            "fetch_group",
            self.backend.fetch_group(&self.user, group_id),
        )
        .await?;
        if group.is_member(&self.user) {
            return Ok(group);
        }
        Err(SyncError::Transient(format!("joining {group_id} kept conflicting")))
    }

    fn adopt(&self, group: &SocialGroup) -> SyncResult<()> {
        self.store.with(|db| {
            db.cache_group(group)?;
            db.set_active_group_id(Some(group.id))
        })
    }

    fn forget(&self, group_id: Uuid) -> SyncResult<()> {
        self.store.with(|db| {
            db.remove_cached_group(group_id)?;
            if db.active_group_id()? == Some(group_id) {
                db.set_active_group_id(None)?;
            }
            Ok(())
        })
    }
}
