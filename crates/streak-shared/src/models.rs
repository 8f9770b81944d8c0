//! The persisted entities and their identity rules.
//!
//! Everything here is plain data plus pure functions; no I/O happens in this
//! module.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::invite::JoinCode;
use crate::types::{DateInt, GameId, UserId};

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// A user as seen by other members. Read-only to the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// SocialGroup / ShareLink
// ---------------------------------------------------------------------------

/// A named set of users who can read each other's scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SocialGroup {
    /// Stable for the group's lifetime.
    pub id: Uuid,
    pub name: String,
    pub members: BTreeSet<UserId>,
    pub join_code: Option<JoinCode>,
    pub share_reference: Option<ShareLink>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl SocialGroup {
    /// A brand-new group whose only member is its creator.
    pub fn new(name: impl Into<String>, creator: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            members: BTreeSet::from([creator.clone()]),
            join_code: Some(JoinCode::generate()),
            share_reference: None,
            created_by: creator,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

/// A shareable join link bound to one group.
///
/// The `url` is derived from the group's root identity, so recreating the
/// link after a capability change can yield the same URL. Freshness is
/// judged by `capability_version`, never by the URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub group_id: Uuid,
    pub url: String,
    /// Opaque token: minimum client capability needed to open the link.
    pub capability_version: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// GameResult / ScoreRecord
// ---------------------------------------------------------------------------

/// A locally recorded game result, produced by share-sheet ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub game_id: GameId,
    pub game_name: String,
    pub date: NaiveDate,
    /// Attempts used; `None` when the puzzle was not solved.
    pub score: Option<u32>,
    pub max_attempts: u32,
    pub completed: bool,
    /// Streak length computed by the local streak tracker.
    pub current_streak: u32,
}

/// One user's result for one game on one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    /// `compute_record_id(user_id, date_int, game_id)`.
    pub id: String,
    pub user_id: UserId,
    /// `None` for private, local-only records.
    pub group_id: Option<Uuid>,
    pub game_id: GameId,
    pub game_name: String,
    pub date_int: DateInt,
    pub score: Option<u32>,
    pub max_attempts: u32,
    pub completed: bool,
    pub current_streak: u32,
    pub allowed_readers: BTreeSet<UserId>,
    pub updated_at: DateTime<Utc>,
}

/// Deterministic composite key for a score record.
///
/// Game ids are `[a-z0-9-]` slugs and the date is fixed-width, so the key
/// is unambiguous.
pub fn record_key(user_id: &UserId, date_int: DateInt, game_id: &GameId) -> String {
    format!("{user_id}_{date_int}_{game_id}")
}

/// Validate raw identifiers and build the composite record id.
pub fn compute_record_id(user_id: &str, date_int: DateInt, game_id: &str) -> SyncResult<String> {
    let user_id = UserId::new(user_id)?;
    let game_id = GameId::new(game_id)?;
    Ok(record_key(&user_id, date_int, &game_id))
}

/// The reader set for a record written into `group`: its full membership.
pub fn compute_allowed_readers(group: &SocialGroup) -> BTreeSet<UserId> {
    group.members.clone()
}

impl ScoreRecord {
    /// Build the canonical record for `result`.
    ///
    /// With no group the record is private and readable by its author
    /// only. The author is always part of the reader set.
    pub fn build(
        user_id: &UserId,
        result: &GameResult,
        group: Option<&SocialGroup>,
        now: DateTime<Utc>,
    ) -> SyncResult<Self> {
        if result.max_attempts == 0 {
            return Err(SyncError::InvalidInput("max_attempts must be positive".into()));
        }
        if let Some(score) = result.score {
            if score > result.max_attempts {
                return Err(SyncError::InvalidInput(format!(
                    "score {score} exceeds max_attempts {}",
                    result.max_attempts
                )));
            }
        }

        let date_int = DateInt::from_date(result.date);
        let mut allowed_readers = group.map(compute_allowed_readers).unwrap_or_default();
        allowed_readers.insert(user_id.clone());

        Ok(Self {
            id: record_key(user_id, date_int, &result.game_id),
            user_id: user_id.clone(),
            group_id: group.map(|g| g.id),
            game_id: result.game_id.clone(),
            game_name: result.game_name.clone(),
            date_int,
            score: result.score,
            max_attempts: result.max_attempts,
            completed: result.completed,
            current_streak: result.current_streak,
            allowed_readers,
            updated_at: now,
        })
    }

    /// Whether two versions carry the same content, ignoring `updated_at`.
    pub fn same_content(&self, other: &ScoreRecord) -> bool {
        self.id == other.id
            && self.user_id == other.user_id
            && self.group_id == other.group_id
            && self.game_id == other.game_id
            && self.game_name == other.game_name
            && self.date_int == other.date_int
            && self.score == other.score
            && self.max_attempts == other.max_attempts
            && self.completed == other.completed
            && self.current_streak == other.current_streak
            && self.allowed_readers == other.allowed_readers
    }

    /// Whether some current member of `group` cannot read this record yet.
    ///
    /// Readers who have since left do not count: a published reader set
    /// only ever grows.
    pub fn lacks_readers_from(&self, group: &SocialGroup) -> bool {
        !group.members.is_subset(&self.allowed_readers)
    }

    /// Grant `group`'s current members read access, keeping every existing
    /// reader and the original `updated_at`.
    pub fn with_readers_added(mut self, group: &SocialGroup) -> Self {
        self.allowed_readers.extend(group.members.iter().cloned());
        self
    }
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
}

/// A friend request between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: Uuid,
    /// Requester. Immutable.
    pub user_id1: UserId,
    /// Recipient. Immutable; the only party allowed to accept.
    pub user_id2: UserId,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    pub fn request(from: UserId, to: UserId) -> SyncResult<Self> {
        if from == to {
            return Err(SyncError::InvalidInput("cannot befriend yourself".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id1: from,
            user_id2: to,
            status: FriendshipStatus::Pending,
            created_at: Utc::now(),
        })
    }

    /// `pending -> accepted`, performed by the recipient only.
    ///
    /// Accepting an already accepted friendship is a no-op.
    pub fn accept(&mut self, actor: &UserId) -> SyncResult<()> {
        if actor != &self.user_id2 {
            return Err(SyncError::Permanent(format!(
                "only {} may accept friendship {}",
                self.user_id2, self.id
            )));
        }
        self.status = FriendshipStatus::Accepted;
        Ok(())
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.user_id1 == user || &self.user_id2 == user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn result(score: Option<u32>) -> GameResult {
        GameResult {
            game_id: GameId::new("wordle").unwrap(),
            game_name: "Wordle".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            score,
            max_attempts: 6,
            completed: score.is_some(),
            current_streak: 4,
        }
    }

    fn group_of(members: &[&str]) -> SocialGroup {
        let mut group = SocialGroup::new("crew", user(members[0]));
        group.members = members.iter().map(|m| user(m)).collect();
        group
    }

    #[test]
    fn record_id_is_deterministic() {
        let date = DateInt::try_from(20240501).unwrap();
        let a = compute_record_id("alice", date, "wordle").unwrap();
        let b = compute_record_id("alice", date, "wordle").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "alice_20240501_wordle");
    }

    #[test]
    fn record_id_rejects_empty_parts() {
        let date = DateInt::try_from(20240501).unwrap();
        assert!(compute_record_id("", date, "wordle").is_err());
        assert!(compute_record_id("alice", date, "").is_err());
    }

    #[test]
    fn readers_equal_membership_exactly() {
        let group = group_of(&["a", "b", "c"]);
        let record = ScoreRecord::build(&user("a"), &result(Some(3)), Some(&group), Utc::now())
            .unwrap();
        let expected: BTreeSet<UserId> = ["a", "b", "c"].iter().map(|u| user(u)).collect();
        assert_eq!(record.allowed_readers, expected);
        assert_eq!(record.group_id, Some(group.id));
    }

    #[test]
    fn private_record_is_author_only() {
        let record = ScoreRecord::build(&user("a"), &result(Some(3)), None, Utc::now()).unwrap();
        assert_eq!(record.allowed_readers, BTreeSet::from([user("a")]));
        assert!(record.group_id.is_none());
    }

    #[test]
    fn build_rejects_impossible_scores() {
        assert!(ScoreRecord::build(&user("a"), &result(Some(9)), None, Utc::now()).is_err());
    }

    #[test]
    fn new_members_are_added_to_readers() {
        let mut group = group_of(&["a", "b"]);
        let record = ScoreRecord::build(&user("a"), &result(Some(2)), Some(&group), Utc::now())
            .unwrap();
        assert!(!record.lacks_readers_from(&group));

        group.members.insert(user("c"));
        assert!(record.lacks_readers_from(&group));

        let stamp = record.updated_at;
        let healed = record.with_readers_added(&group);
        assert!(!healed.lacks_readers_from(&group));
        assert!(healed.allowed_readers.contains(&user("c")));
        assert_eq!(healed.updated_at, stamp);
    }

    #[test]
    fn departed_members_keep_read_access() {
        let mut group = group_of(&["a", "b"]);
        let record = ScoreRecord::build(&user("a"), &result(Some(2)), Some(&group), Utc::now())
            .unwrap();

        group.members.remove(&user("b"));
        assert!(!record.lacks_readers_from(&group));

        group.members.insert(user("c"));
        let healed = record.with_readers_added(&group);
        let expected: BTreeSet<UserId> = ["a", "b", "c"].iter().map(|u| user(u)).collect();
        assert_eq!(healed.allowed_readers, expected);
    }

    #[test]
    fn same_content_ignores_timestamp() {
        let a = ScoreRecord::build(&user("a"), &result(Some(2)), None, Utc::now()).unwrap();
        let mut b = a.clone();
        b.updated_at = a.updated_at + chrono::Duration::seconds(30);
        assert!(a.same_content(&b));
        b.score = Some(3);
        assert!(!a.same_content(&b));
    }

    #[test]
    fn only_recipient_accepts_friendship() {
        let mut f = Friendship::request(user("a"), user("b")).unwrap();
        assert!(f.accept(&user("a")).is_err());
        assert_eq!(f.status, FriendshipStatus::Pending);
        f.accept(&user("b")).unwrap();
        assert_eq!(f.status, FriendshipStatus::Accepted);
        assert_eq!(f.user_id1, user("a"));
    }

    #[test]
    fn cannot_befriend_self() {
        assert!(Friendship::request(user("a"), user("a")).is_err());
    }
}
