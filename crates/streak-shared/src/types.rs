use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

// Stable, backend-assigned account identity handed over by auth bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> SyncResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidInput("user id must not be empty".into()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(SyncError::InvalidInput(format!(
                "user id must not contain whitespace: {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = SyncError;

    fn try_from(value: String) -> SyncResult<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// Slug identifying a puzzle game (`wordle`, `mini-crossword`, ...).
///
/// Restricted to lowercase ASCII letters, digits and `-` so that the
/// composite score id can never be ambiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

impl GameId {
    pub fn new(raw: impl Into<String>) -> SyncResult<Self> {
        let raw = raw.into();
        let slug = raw.trim().to_ascii_lowercase();
        if slug.is_empty() {
            return Err(SyncError::InvalidInput("game id must not be empty".into()));
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(SyncError::InvalidInput(format!(
                "game id must be a [a-z0-9-] slug: {raw:?}"
            )));
        }
        Ok(Self(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GameId {
    type Error = SyncError;

    fn try_from(value: String) -> SyncResult<Self> {
        Self::new(value)
    }
}

impl From<GameId> for String {
    fn from(value: GameId) -> Self {
        value.0
    }
}

/// A calendar day encoded as `YYYYMMDD`, UTC-normalised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u32", into = "u32")]
pub struct DateInt(u32);

impl DateInt {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.year() as u32 * 10_000 + date.month() * 100 + date.day())
    }

    pub fn from_utc(ts: DateTime<Utc>) -> Self {
        Self::from_date(ts.date_naive())
    }

    pub fn today() -> Self {
        Self::from_utc(Utc::now())
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn to_date(&self) -> NaiveDate {
        // Constructors guarantee validity.
        NaiveDate::from_ymd_opt((self.0 / 10_000) as i32, (self.0 / 100) % 100, self.0 % 100)
            .unwrap_or_default()
    }
}

impl TryFrom<u32> for DateInt {
    type Error = SyncError;

    fn try_from(value: u32) -> SyncResult<Self> {
        NaiveDate::from_ymd_opt((value / 10_000) as i32, (value / 100) % 100, value % 100)
            .filter(|_| (10_000_000..=99_999_999).contains(&value))
            .map(|_| Self(value))
            .ok_or_else(|| SyncError::InvalidInput(format!("not a YYYYMMDD date: {value}")))
    }
}

impl From<DateInt> for u32 {
    fn from(value: DateInt) -> Self {
        value.0
    }
}

impl std::fmt::Display for DateInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_blank() {
        assert!(UserId::new("   ").is_err());
        assert!(UserId::new("a b").is_err());
        assert_eq!(UserId::new(" alice ").unwrap().as_str(), "alice");
    }

    #[test]
    fn game_id_is_slug() {
        assert_eq!(GameId::new("Wordle").unwrap().as_str(), "wordle");
        assert!(GameId::new("mini_crossword").is_err());
        assert!(GameId::new("").is_err());
    }

    #[test]
    fn date_int_from_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let d = DateInt::from_date(date);
        assert_eq!(d.value(), 20240307);
        assert_eq!(d.to_date(), date);
        assert_eq!(d.to_string(), "20240307");
    }

    #[test]
    fn date_int_rejects_impossible_days() {
        assert!(DateInt::try_from(20240230).is_err());
        assert!(DateInt::try_from(2024).is_err());
        assert!(DateInt::try_from(20241231).is_ok());
    }
}
