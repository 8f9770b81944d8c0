//! Request and response bodies exchanged between the sync engine's HTTP
//! backend adapter and the reference server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::invite::JoinCode;
use crate::types::{DateInt, GameId, UserId};

/// Result of a score upsert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Same content already stored; nothing was written.
    Unchanged,
}

/// Filter for reading the `scores` collection of one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreQuery {
    pub group_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_int: Option<DateInt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    /// Keep at most this many of the newest matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ScoreQuery {
    pub fn for_group(group_id: Uuid) -> Self {
        Self {
            group_id,
            date_int: None,
            game_id: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub id: Uuid,
    pub name: String,
    pub join_code: JoinCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShareRequest {
    pub capability_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareStatus {
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileLookupRequest {
    pub ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterProfileRequest {
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestBody {
    pub recipient: UserId,
}

/// JSON body of every non-2xx server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
}
