//! Friends derived from shared group membership, plus the explicit
//! friend-request flow.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use streak_shared::{Friendship, SyncError, SyncResult, UserId, UserProfile};

use crate::backend::{bounded, Backend};
use crate::groups::GroupManager;

#[derive(Clone)]
pub struct FriendDirectory {
    user: UserId,
    backend: Arc<dyn Backend>,
    groups: GroupManager,
    timeout: Duration,
}

impl FriendDirectory {
    pub fn new(
        user: UserId,
        backend: Arc<dyn Backend>,
        groups: GroupManager,
        timeout: Duration,
    ) -> Self {
        Self {
            user,
            backend,
            groups,
            timeout,
        }
    }

    /// Every other member of every group the caller belongs to, one entry
    /// per user, sorted by id. Empty when the caller is in no group.
    pub async fn list_friends(&self) -> SyncResult<Vec<UserProfile>> {
        let ids: BTreeSet<UserId> = self
            .groups
            .list_groups()
            .await?
            .into_iter()
            .flat_map(|g| g.members.into_iter())
            .filter(|id| id != &self.user)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<UserId> = ids.into_iter().collect();
        let known = match bounded(
            self.timeout,
            "fetch_profiles",
            self.backend.fetch_profiles(&self.user, &ids),
        )
        .await
        {
            Ok(profiles) => profiles,
            Err(err) if err.is_transient() => {
                debug!(error = %err, "Profiles unavailable, using ids");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        Ok(ids
            .into_iter()
            .map(|id| {
                known
                    .iter()
                    .find(|p| p.id == id)
                    .cloned()
                    .unwrap_or_else(|| UserProfile {
                        display_name: id.to_string(),
                        id,
                    })
            })
            .collect())
    }

    pub async fn send_friend_request(&self, recipient: &UserId) -> SyncResult<Friendship> {
        if recipient == &self.user {
            return Err(SyncError::InvalidInput("cannot befriend yourself".into()));
        }
        bounded(
            self.timeout,
            "create_friendship",
            self.backend.create_friendship(&self.user, recipient),
        )
        .await
    }

    /// `pending -> accepted`. The backend refuses anyone but the recipient
    /// with `Permanent`.
    pub async fn accept_friend_request(&self, id: Uuid) -> SyncResult<Friendship> {
        bounded(
            self.timeout,
            "accept_friendship",
            self.backend.accept_friendship(&self.user, id),
        )
        .await
    }

    pub async fn friend_requests(&self) -> SyncResult<Vec<Friendship>> {
        bounded(self.timeout, "friendships_for", self.backend.friendships_for(&self.user)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use streak_shared::{FriendshipStatus, GameId, GameResult, ScoreRecord};

    use crate::backend::MemoryBackend;
    use crate::groups::GroupPolicy;
    use crate::local::LocalStore;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn directory(backend: &MemoryBackend, id: &str) -> FriendDirectory {
        let groups = GroupManager::new(
            user(id),
            Arc::new(backend.clone()),
            LocalStore::open_in_memory().unwrap(),
            GroupPolicy { single_group_mode: true },
            Duration::from_secs(10),
        );
        FriendDirectory::new(user(id), Arc::new(backend.clone()), groups, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn no_groups_means_no_friends() {
        let backend = MemoryBackend::new();
        let alice = directory(&backend, "alice");
        assert!(alice.list_friends().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn friends_are_other_members_with_profiles() {
        let backend = MemoryBackend::new();
        let alice = directory(&backend, "alice");
        let bob = directory(&backend, "bob");
        backend
            .register_profile(&UserProfile {
                id: user("bob"),
                display_name: "Bob".into(),
            })
            .await
            .unwrap();

        let group = alice.groups.create_group("Crew").await.unwrap();
        bob.groups
            .join_group(group.join_code.unwrap().as_str())
            .await
            .unwrap();

        let friends = alice.list_friends().await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].display_name, "Bob");
        assert_eq!(bob.list_friends().await.unwrap()[0].display_name, "alice");
    }

    #[tokio::test]
    async fn leaving_drops_friends_but_keeps_records() {
        let backend = MemoryBackend::new();
        let alice = directory(&backend, "alice");
        let bob = directory(&backend, "bob");
        let group = alice.groups.create_group("Crew").await.unwrap();
        let group = bob
            .groups
            .join_group(group.join_code.unwrap().as_str())
            .await
            .unwrap();

        let result = GameResult {
            game_id: GameId::new("wordle").unwrap(),
            game_name: "Wordle".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            score: Some(3),
            max_attempts: 6,
            completed: true,
            current_streak: 1,
        };
        let record = ScoreRecord::build(&user("bob"), &result, Some(&group), Utc::now()).unwrap();
        backend.upsert_score(&user("bob"), &record).await.unwrap();

        bob.groups.leave_group(group.id).await.unwrap();

        assert!(bob.list_friends().await.unwrap().is_empty());
        assert!(alice.list_friends().await.unwrap().is_empty());
        let stored = backend.inspect(|c| c.score(&record.id).cloned()).await.unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn only_recipient_accepts() {
        let backend = MemoryBackend::new();
        let alice = directory(&backend, "alice");
        let bob = directory(&backend, "bob");

        let request = alice.send_friend_request(&user("bob")).await.unwrap();
        assert_eq!(request.status, FriendshipStatus::Pending);

        let err = alice.accept_friend_request(request.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Permanent(_)));

        let accepted = bob.accept_friend_request(request.id).await.unwrap();
        assert_eq!(accepted.status, FriendshipStatus::Accepted);
        assert_eq!(accepted.user_id1, user("alice"));
        assert_eq!(bob.friend_requests().await.unwrap().len(), 1);
    }
}
