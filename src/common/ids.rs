//! Canonical identifiers
//!
//! Each entity has exactly one id type. Generated ids wrap a UUID v4;
//! user ids are issued by the external user service and only need to be
//! non-empty.

use crate::errors::{PayoutError, PayoutResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declare a UUID-backed id newtype with parsing and display
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = PayoutError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| PayoutError::InvalidInput(format!("invalid {} id '{}': {}", $entity, s, e)))
            }
        }
    };
}

entity_id!(
    /// Lobby primary key
    LobbyId,
    "lobby"
);
entity_id!(
    /// Match primary key
    MatchId,
    "match"
);
entity_id!(
    /// Ledger transaction primary key
    TransactionId,
    "transaction"
);

/// User identifier; also the primary key of the user's wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> PayoutResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PayoutError::InvalidInput("user_id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last `n` characters, used for placeholder wallet addresses
    pub fn suffix(&self, n: usize) -> &str {
        let count = self.0.chars().count();
        if count <= n {
            return &self.0;
        }
        let skip = count - n;
        match self.0.char_indices().nth(skip) {
            Some((idx, _)) => &self.0[idx..],
            None => &self.0,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = PayoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UserId::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl FromStr for UserId {
    type Err = PayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserId::new(s)
    }
}
