//! Member identities.
//!
//! A member is identified by an email-like string. Identities compare after
//! normalization (surrounding whitespace trimmed, ASCII lower-cased), so
//! `" Ann@Example.com"` and `"ann@example.com"` name the same member.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned when parsing a [`MemberId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemberIdError {
    #[error("member identity is empty")]
    Empty,

    #[error("member identity {0:?} contains whitespace or control characters")]
    InvalidCharacters(String),
}

/// A normalized member identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberId(String);

impl MemberId {
    /// Parse and normalize an identity.
    pub fn parse(raw: &str) -> Result<Self, MemberIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MemberIdError::Empty);
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(MemberIdError::InvalidCharacters(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The normalized identity, as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity rendered as an email address.
    pub fn email(&self) -> &str {
        &self.0
    }

    /// Display name: the part of the email before `@`.
    pub fn nickname(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MemberId {
    type Err = MemberIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemberId {
    type Error = MemberIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MemberId> for String {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

impl AsRef<str> for MemberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
