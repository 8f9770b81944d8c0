use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{DEEP_LINK_PREFIX, JOIN_CODE_ALPHABET, JOIN_CODE_LEN};
use crate::error::SyncError;

/// A short, human-typable group join code.
///
/// Always stored upper-case so that lookups are case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct JoinCode(String);

impl JoinCode {
    /// Generate a fresh random code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..JOIN_CODE_LEN)
            .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse a typed code, ignoring case and surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self, InviteError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != JOIN_CODE_LEN {
            return Err(InviteError::InvalidLength(code.len()));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InviteError::InvalidFormat);
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tappable `app://join?code=<code>` form of this code.
    pub fn deep_link(&self) -> String {
        format!("{DEEP_LINK_PREFIX}?code={}", self.0)
    }
}

impl std::fmt::Display for JoinCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JoinCode {
    type Error = InviteError;

    fn try_from(value: String) -> Result<Self, InviteError> {
        Self::parse(&value)
    }
}

impl From<JoinCode> for String {
    fn from(value: JoinCode) -> Self {
        value.0
    }
}

/// Accept either a bare join code or an `app://join?code=...` link.
///
/// Both entry points resolve to the same [`JoinCode`], so joining by typed
/// code and by tapped link go through one code path.
pub fn parse_join_input(input: &str) -> Result<JoinCode, InviteError> {
    let input = input.trim();
    match input.strip_prefix(DEEP_LINK_PREFIX) {
        Some(rest) => {
            let query = rest.strip_prefix('?').ok_or(InviteError::InvalidLink)?;
            let code = query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "code")
                .map(|(_, value)| value)
                .ok_or(InviteError::MissingCode)?;
            JoinCode::parse(code)
        }
        None if input.contains("://") => Err(InviteError::InvalidLink),
        None => JoinCode::parse(input),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InviteError {
    #[error("Join code must be {JOIN_CODE_LEN} characters, got {0}")]
    InvalidLength(usize),

    #[error("Join code must be alphanumeric")]
    InvalidFormat,

    #[error("Not a join link")]
    InvalidLink,

    #[error("Join link has no code parameter")]
    MissingCode,
}

impl From<InviteError> for SyncError {
    fn from(err: InviteError) -> Self {
        SyncError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_parse_back() {
        for _ in 0..32 {
            let code = JoinCode::generate();
            assert_eq!(code.as_str().len(), JOIN_CODE_LEN);
            assert_eq!(JoinCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        let lower = JoinCode::parse(" ab12cd ").unwrap();
        assert_eq!(lower.as_str(), "AB12CD");
        assert_eq!(lower, JoinCode::parse("AB12CD").unwrap());
    }

    #[test]
    fn link_and_code_resolve_identically() {
        let code = JoinCode::parse("XY7Z9Q").unwrap();
        let from_link = parse_join_input(&code.deep_link()).unwrap();
        let from_typed = parse_join_input("xy7z9q").unwrap();
        assert_eq!(from_link, code);
        assert_eq!(from_typed, code);
    }

    #[test]
    fn link_query_order_does_not_matter() {
        let code = parse_join_input("app://join?ref=share&code=abcdef").unwrap();
        assert_eq!(code.as_str(), "ABCDEF");
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_join_input("ABC"), Err(InviteError::InvalidLength(3)));
        assert_eq!(parse_join_input("AB-CDE"), Err(InviteError::InvalidFormat));
        assert_eq!(parse_join_input("app://join?ref=x"), Err(InviteError::MissingCode));
        assert_eq!(
            parse_join_input("https://example.com/join?code=ABCDEF"),
            Err(InviteError::InvalidLink)
        );
    }
}
