//! Shareable join links for a group, and their safe recreation when the
//! capability they advertise goes stale.
//!
//! A link's URL is derived from the group's join code, so recreating the
//! share does not necessarily change it. Freshness is therefore judged by
//! `capability_version` alone.
//!
//! Recreation always deletes the old share and waits until the backend
//! confirms it is gone before creating the new one. If confirmation does
//! not arrive in time the operation fails `Transient` and leaves the old
//! share in place rather than risking two live shares for one group.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use streak_shared::{ShareLink, SocialGroup, SyncError, SyncResult, UserId};

use crate::backend::{bounded, Backend};
use crate::config::SyncConfig;
use crate::events::{emit_event, SyncEvent};
use crate::groups::GroupManager;

#[derive(Debug, Clone)]
pub struct ShareTiming {
    pub request_timeout: Duration,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

impl ShareTiming {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            request_timeout: config.network_timeout,
            confirm_timeout: config.share_confirm_timeout,
            poll_interval: config.share_poll_interval,
        }
    }
}

#[derive(Clone)]
pub struct InviteLinkManager {
    user: UserId,
    backend: Arc<dyn Backend>,
    groups: GroupManager,
    capability_version: String,
    timing: ShareTiming,
    events: broadcast::Sender<SyncEvent>,
    locks: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl InviteLinkManager {
    pub fn new(
        user: UserId,
        backend: Arc<dyn Backend>,
        groups: GroupManager,
        capability_version: impl Into<String>,
        timing: ShareTiming,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            user,
            backend,
            groups,
            capability_version: capability_version.into(),
            timing,
            events,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// The group's current link, recreated first if it was created for an
    /// older client capability (or does not exist yet).
    pub async fn ensure_share_link(&self, group_id: Uuid) -> SyncResult<ShareLink> {
        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        let existing = bounded(
            self.timing.request_timeout,
            "fetch_share",
            self.backend.fetch_share(&self.user, group_id),
        )
        .await?;

        match existing {
            Some(link) if link.capability_version == self.capability_version => {
                debug!(%group_id, "Share link is current");
                self.groups.record_share(&link)?;
                Ok(link)
            }
            Some(link) => {
                info!(
                    %group_id,
                    have = %link.capability_version,
                    want = %self.capability_version,
                    "Share link capability is stale, recreating"
                );
                self.recreate_locked(group_id).await
            }
            None => self.recreate_locked(group_id).await,
        }
    }

    /// Delete the group's share, wait for the deletion to be confirmed, then
    /// create a fresh one.
    pub async fn force_recreate(&self, group_id: Uuid) -> SyncResult<ShareLink> {
        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;
        self.recreate_locked(group_id).await
    }

    /// Join the group a shared link points to. Safe to call twice.
    pub async fn accept_share_link(&self, url: &str) -> SyncResult<SocialGroup> {
        self.groups.join_group(url).await
    }

    async fn recreate_locked(&self, group_id: Uuid) -> SyncResult<ShareLink> {
        let live = bounded(
            self.timing.request_timeout,
            "share_exists",
            self.backend.share_exists(&self.user, group_id),
        )
        .await?;

        if live {
            bounded(
                self.timing.request_timeout,
                "delete_share",
                self.backend.delete_share(&self.user, group_id),
            )
            .await?;
            self.confirm_deleted(group_id).await?;
        }

        let link = match bounded(
            self.timing.request_timeout,
            "create_share",
            self.backend
                .create_share(&self.user, group_id, &self.capability_version),
        )
        .await
        {
            Ok(link) => link,
            Err(SyncError::Conflict(msg)) => {
                warn!(%group_id, "Share reappeared before creation");
                return Err(SyncError::Transient(format!("share still live: {msg}")));
            }
            Err(err) => return Err(err),
        };

        self.groups.record_share(&link)?;
        info!(%group_id, url = %link.url, "Share link recreated");
        emit_event(
            &self.events,
            SyncEvent::ShareLinkRecreated {
                group_id,
                url: link.url.clone(),
            },
        );
        Ok(link)
    }

    async fn confirm_deleted(&self, group_id: Uuid) -> SyncResult<()> {
        let poll = async {
            loop {
                let exists = bounded(
                    self.timing.request_timeout,
                    "share_exists",
                    self.backend.share_exists(&self.user, group_id),
                )
                .await?;
                if !exists {
                    return Ok::<(), SyncError>(());
                }
                tokio::time::sleep(self.timing.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.timing.confirm_timeout, poll).await {
            Ok(res) => res,
            Err(_) => {
                warn!(%group_id, "Share deletion not confirmed in time");
                Err(SyncError::Transient(format!(
                    "deletion of share for group {group_id} not confirmed within {:?}",
                    self.timing.confirm_timeout
                )))
            }
        }
    }

    fn group_lock(&self, group_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(group_id).or_default().clone()
    }
}
