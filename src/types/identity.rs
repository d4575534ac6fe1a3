//! Identity Types
//!
//! The advertising identity issued by the identity service, its status
//! classification and the state published by the identity manager.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// An advertising identity together with the credentials needed to refresh it.
///
/// All timestamps are milliseconds since the Unix epoch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Token surfaced to the embedding application.
    pub advertising_token: String,
    /// Opaque credential used to obtain the next identity.
    pub refresh_token: String,
    /// After this time the advertising token must not be used.
    #[serde(deserialize_with = "deserialize_millis")]
    pub identity_expires: i64,
    /// Earliest time a refresh should be attempted.
    #[serde(deserialize_with = "deserialize_millis")]
    pub refresh_from: i64,
    /// After this time the refresh token is no longer accepted.
    #[serde(deserialize_with = "deserialize_millis")]
    pub refresh_expires: i64,
    /// Base64 symmetric key for decrypting the refresh response.
    pub refresh_response_key: String,
}

impl Identity {
    /// Create a new identity.
    pub fn new(
        advertising_token: impl Into<String>,
        refresh_token: impl Into<String>,
        identity_expires: i64,
        refresh_from: i64,
        refresh_expires: i64,
        refresh_response_key: impl Into<String>,
    ) -> Self {
        Self {
            advertising_token: advertising_token.into(),
            refresh_token: refresh_token.into(),
            identity_expires,
            refresh_from,
            refresh_expires,
            refresh_response_key: refresh_response_key.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("advertising_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("identity_expires", &self.identity_expires)
            .field("refresh_from", &self.refresh_from)
            .field("refresh_expires", &self.refresh_expires)
            .field("refresh_response_key", &"[REDACTED]")
            .finish()
    }
}

/// Timestamps arrive either as JSON numbers or as numeric strings.
fn deserialize_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(i64),
        Text(String),
    }

    match Millis::deserialize(deserializer)? {
        Millis::Number(value) => Ok(value),
        Millis::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Classification of the current identity.
///
/// The integer values are part of the persisted format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum IdentityStatus {
    Established,
    Refreshed,
    Expired,
    NoIdentity,
    Invalid,
    RefreshExpired,
    OptOut,
}

impl IdentityStatus {
    /// Persisted integer value.
    pub fn value(&self) -> i32 {
        match self {
            Self::Established => 0,
            Self::Refreshed => 1,
            Self::Expired => 100,
            Self::NoIdentity => -1,
            Self::Invalid => -2,
            Self::RefreshExpired => -3,
            Self::OptOut => -4,
        }
    }

    /// Convert a persisted integer value back into a status.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Established),
            1 => Some(Self::Refreshed),
            100 => Some(Self::Expired),
            -1 => Some(Self::NoIdentity),
            -2 => Some(Self::Invalid),
            -3 => Some(Self::RefreshExpired),
            -4 => Some(Self::OptOut),
            _ => None,
        }
    }
}

impl TryFrom<i32> for IdentityStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_value(value).ok_or_else(|| format!("unknown identity status {}", value))
    }
}

impl From<IdentityStatus> for i32 {
    fn from(status: IdentityStatus) -> Self {
        status.value()
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Established => "Established",
            Self::Refreshed => "Refreshed",
            Self::Expired => "Expired",
            Self::NoIdentity => "No Identity",
            Self::Invalid => "Invalid",
            Self::RefreshExpired => "Refresh Expired",
            Self::OptOut => "Opt Out",
        };
        f.write_str(text)
    }
}

/// State published by the identity manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// Previously persisted state has not been restored yet.
    Loading,
    Established(Identity),
    Refreshed(Identity),
    NoIdentity,
    Expired(Identity),
    Invalid,
    RefreshExpired,
    OptOut,
}

impl ManagerState {
    /// Build the state for an identity and its status.
    ///
    /// Statuses that carry an identity fall back to `Invalid` when none is given.
    pub fn from_parts(identity: Option<Identity>, status: IdentityStatus) -> Self {
        match (status, identity) {
            (IdentityStatus::Established, Some(identity)) => Self::Established(identity),
            (IdentityStatus::Refreshed, Some(identity)) => Self::Refreshed(identity),
            (IdentityStatus::Expired, Some(identity)) => Self::Expired(identity),
            (IdentityStatus::Established, None)
            | (IdentityStatus::Refreshed, None)
            | (IdentityStatus::Expired, None) => Self::Invalid,
            (IdentityStatus::NoIdentity, _) => Self::NoIdentity,
            (IdentityStatus::Invalid, _) => Self::Invalid,
            (IdentityStatus::RefreshExpired, _) => Self::RefreshExpired,
            (IdentityStatus::OptOut, _) => Self::OptOut,
        }
    }

    /// The held identity, if the state carries one.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Established(identity) | Self::Refreshed(identity) | Self::Expired(identity) => {
                Some(identity)
            }
            _ => None,
        }
    }

    /// Status of the state. `Loading` reports `NoIdentity`.
    pub fn status(&self) -> IdentityStatus {
        match self {
            Self::Loading | Self::NoIdentity => IdentityStatus::NoIdentity,
            Self::Established(_) => IdentityStatus::Established,
            Self::Refreshed(_) => IdentityStatus::Refreshed,
            Self::Expired(_) => IdentityStatus::Expired,
            Self::Invalid => IdentityStatus::Invalid,
            Self::RefreshExpired => IdentityStatus::RefreshExpired,
            Self::OptOut => IdentityStatus::OptOut,
        }
    }

    /// The advertising token, only while the identity is established or refreshed.
    pub fn advertising_token(&self) -> Option<&str> {
        match self {
            Self::Established(identity) | Self::Refreshed(identity) => {
                Some(identity.advertising_token.as_str())
            }
            _ => None,
        }
    }
}

/// Outcome of validating a candidate identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityPackage {
    /// Whether the identity can still be used or refreshed.
    pub valid: bool,
    /// The identity to hold, if any.
    pub identity: Option<Identity>,
    pub status: IdentityStatus,
    /// Human readable reason, for logging.
    pub message: &'static str,
}

/// Result of a refresh or generate round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePackage {
    pub identity: Option<Identity>,
    pub status: IdentityStatus,
    pub message: String,
}
