//! In-process model of the backend's `scores`, `groups` and `friendships`
//! collections, plus share links and profiles.
//!
//! [`Collections`] applies the rules the hosted backend is expected to
//! enforce: membership-gated score writes, one live share per group,
//! unique case-insensitive join codes, merge-only membership adds and
//! recipient-only friendship acceptance. Both the reference server and the
//! in-memory test backend wrap it behind a lock.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::invite::JoinCode;
use crate::models::{record_key, Friendship, ScoreRecord, ShareLink, SocialGroup, UserProfile};
use crate::protocol::{CreateGroupRequest, ScoreQuery, UpsertOutcome};
use crate::types::UserId;

#[derive(Debug, Default)]
pub struct Collections {
    scores: HashMap<String, ScoreRecord>,
    groups: HashMap<Uuid, SocialGroup>,
    codes: HashMap<JoinCode, Uuid>,
    shares: HashMap<Uuid, ShareLink>,
    profiles: HashMap<UserId, UserProfile>,
    friendships: HashMap<Uuid, Friendship>,
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Scores
    // ------------------------------------------------------------------

    /// Insert or overwrite a score keyed by its deterministic id.
    pub fn upsert_score(
        &mut self,
        author: &UserId,
        record: ScoreRecord,
    ) -> SyncResult<UpsertOutcome> {
        if &record.user_id != author {
            return Err(SyncError::Permanent(format!(
                "{author} cannot write a score owned by {}",
                record.user_id
            )));
        }
        if record.id != record_key(&record.user_id, record.date_int, &record.game_id) {
            return Err(SyncError::InvalidInput(format!(
                "score id {} does not match its key fields",
                record.id
            )));
        }
        let group_id = record
            .group_id
            .ok_or_else(|| SyncError::InvalidInput("private scores are never uploaded".into()))?;
        let group = self.group_ref(group_id)?;
        if !group.is_member(author) {
            return Err(SyncError::Permanent(format!(
                "{author} is not a member of group {group_id}"
            )));
        }
        if !record.allowed_readers.contains(author) {
            return Err(SyncError::InvalidInput("author must be an allowed reader".into()));
        }

        let outcome = match self.scores.get(&record.id) {
            Some(existing) if existing.same_content(&record) => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        self.scores.insert(record.id.clone(), record);
        Ok(outcome)
    }

    /// Scores of one group visible to `reader`, oldest first.
    ///
    /// With a `limit`, only the newest `limit` matches are kept.
    pub fn query_scores(&self, reader: &UserId, query: &ScoreQuery) -> Vec<ScoreRecord> {
        let mut matches: Vec<ScoreRecord> = self
            .scores
            .values()
            .filter(|r| r.group_id == Some(query.group_id))
            .filter(|r| r.allowed_readers.contains(reader))
            .filter(|r| query.date_int.map_or(true, |d| r.date_int == d))
            .filter(|r| query.game_id.as_ref().map_or(true, |g| &r.game_id == g))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            let excess = matches.len().saturating_sub(limit);
            matches.drain(..excess);
        }
        matches
    }

    pub fn score(&self, id: &str) -> Option<&ScoreRecord> {
        self.scores.get(id)
    }

    pub fn score_count(&self) -> usize {
        self.scores.len()
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub fn create_group(
        &mut self,
        creator: &UserId,
        req: CreateGroupRequest,
    ) -> SyncResult<SocialGroup> {
        if self.groups.contains_key(&req.id) {
            return Err(SyncError::Conflict(format!("group {} already exists", req.id)));
        }
        if self.codes.contains_key(&req.join_code) {
            return Err(SyncError::Conflict(format!("join code {} is taken", req.join_code)));
        }
        let group = SocialGroup {
            id: req.id,
            name: req.name,
            members: [creator.clone()].into(),
            join_code: Some(req.join_code.clone()),
            share_reference: None,
            created_by: creator.clone(),
            created_at: Utc::now(),
        };
        self.codes.insert(req.join_code, group.id);
        self.groups.insert(group.id, group.clone());
        Ok(group)
    }

    pub fn group(&self, id: Uuid) -> SyncResult<SocialGroup> {
        self.group_ref(id).map(|g| self.with_share(g))
    }

    pub fn group_by_code(&self, code: &JoinCode) -> SyncResult<SocialGroup> {
        let id = self
            .codes
            .get(code)
            .ok_or_else(|| SyncError::NotFound(format!("no group for join code {code}")))?;
        self.group(*id)
    }

    /// Merge `user` into the member set. Idempotent.
    pub fn add_member(&mut self, group_id: Uuid, user: &UserId) -> SyncResult<SocialGroup> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| SyncError::NotFound(format!("group {group_id}")))?;
        group.members.insert(user.clone());
        self.group(group_id)
    }

    /// Remove `user` from the member set. Idempotent.
    pub fn remove_member(&mut self, group_id: Uuid, user: &UserId) -> SyncResult<SocialGroup> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| SyncError::NotFound(format!("group {group_id}")))?;
        group.members.remove(user);
        self.group(group_id)
    }

    pub fn groups_for_member(&self, user: &UserId) -> Vec<SocialGroup> {
        let mut groups: Vec<SocialGroup> = self
            .groups
            .values()
            .filter(|g| g.is_member(user))
            .map(|g| self.with_share(g))
            .collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        groups
    }

    fn group_ref(&self, id: Uuid) -> SyncResult<&SocialGroup> {
        self.groups
            .get(&id)
            .ok_or_else(|| SyncError::NotFound(format!("group {id}")))
    }

    fn with_share(&self, group: &SocialGroup) -> SocialGroup {
        let mut group = group.clone();
        group.share_reference = self.shares.get(&group.id).cloned();
        group
    }

    // ------------------------------------------------------------------
    // Shares
    // ------------------------------------------------------------------

    pub fn share(&self, group_id: Uuid) -> Option<ShareLink> {
        self.shares.get(&group_id).cloned()
    }

    /// Create the group's share link. Fails with `Conflict` while another
    /// share for the same group is still live.
    pub fn create_share(
        &mut self,
        actor: &UserId,
        group_id: Uuid,
        capability_version: &str,
    ) -> SyncResult<ShareLink> {
        let group = self.group_ref(group_id)?;
        if !group.is_member(actor) {
            return Err(SyncError::Permanent(format!(
                "{actor} is not a member of group {group_id}"
            )));
        }
        if self.shares.contains_key(&group_id) {
            return Err(SyncError::Conflict(format!(
                "group {group_id} already has a live share"
            )));
        }
        let code = group
            .join_code
            .as_ref()
            .ok_or_else(|| SyncError::InvalidInput(format!("group {group_id} has no join code")))?;

        // The URL depends on the group only, not on this share.
        let share = ShareLink {
            group_id,
            url: code.deep_link(),
            capability_version: capability_version.to_string(),
            created_at: Utc::now(),
        };
        self.shares.insert(group_id, share.clone());
        Ok(share)
    }

    /// Delete the group's share link. Returns whether one existed.
    pub fn delete_share(&mut self, actor: &UserId, group_id: Uuid) -> SyncResult<bool> {
        let group = self.group_ref(group_id)?;
        if !group.is_member(actor) {
            return Err(SyncError::Permanent(format!(
                "{actor} is not a member of group {group_id}"
            )));
        }
        Ok(self.shares.remove(&group_id).is_some())
    }

    pub fn live_share_count(&self, group_id: Uuid) -> usize {
        usize::from(self.shares.contains_key(&group_id))
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    pub fn register_profile(&mut self, profile: UserProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Known profiles among `ids`; unknown ids are skipped.
    pub fn profiles(&self, ids: &[UserId]) -> Vec<UserProfile> {
        ids.iter()
            .filter_map(|id| self.profiles.get(id).cloned())
            .collect()
    }

    // ------------------------------------------------------------------
    // Friendships
    // ------------------------------------------------------------------

    pub fn create_friendship(
        &mut self,
        requester: &UserId,
        recipient: &UserId,
    ) -> SyncResult<Friendship> {
        if let Some(existing) = self.friendships.values().find(|f| {
            (&f.user_id1 == requester && &f.user_id2 == recipient)
                || (&f.user_id1 == recipient && &f.user_id2 == requester)
        }) {
            return Ok(existing.clone());
        }
        let friendship = Friendship::request(requester.clone(), recipient.clone())?;
        self.friendships.insert(friendship.id, friendship.clone());
        Ok(friendship)
    }

    pub fn friendship(&self, actor: &UserId, id: Uuid) -> SyncResult<Friendship> {
        self.friendships
            .get(&id)
            .filter(|f| f.involves(actor))
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("friendship {id}")))
    }

    pub fn friendships_for(&self, user: &UserId) -> Vec<Friendship> {
        let mut found: Vec<Friendship> = self
            .friendships
            .values()
            .filter(|f| f.involves(user))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        found
    }

    pub fn accept_friendship(&mut self, actor: &UserId, id: Uuid) -> SyncResult<Friendship> {
        let friendship = self
            .friendships
            .get_mut(&id)
            .filter(|f| f.involves(actor))
            .ok_or_else(|| SyncError::NotFound(format!("friendship {id}")))?;
        friendship.accept(actor)?;
        Ok(friendship.clone())
    }
}
