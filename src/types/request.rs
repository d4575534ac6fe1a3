//! Identity Request Types
//!
//! Directly identifying information accepted for client-side generation.

use serde_json::json;

use crate::core::input::{hash_identifier, normalize_email, normalize_phone};
use crate::error::UID2Error;

/// The identifier a new identity should be generated for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityRequest {
    /// A raw email address.
    Email(String),
    /// A SHA-256 hashed, base64 encoded email address.
    EmailHash(String),
    /// A raw phone number in E.164 format.
    Phone(String),
    /// A SHA-256 hashed, base64 encoded phone number.
    PhoneHash(String),
}

impl IdentityRequest {
    /// Validate and normalize the request. Hashes are passed through untouched.
    pub fn normalize(&self) -> Result<Self, UID2Error> {
        Ok(match self {
            Self::Email(email) => Self::Email(normalize_email(email)?),
            Self::Phone(phone) => Self::Phone(normalize_phone(phone)?.to_string()),
            other => other.clone(),
        })
    }

    fn payload_key(&self) -> &'static str {
        match self {
            Self::Email(_) | Self::EmailHash(_) => "email_hash",
            Self::Phone(_) | Self::PhoneHash(_) => "phone_hash",
        }
    }

    fn payload_value(&self) -> String {
        match self {
            Self::Email(value) | Self::Phone(value) => hash_identifier(value),
            Self::EmailHash(hash) | Self::PhoneHash(hash) => hash.clone(),
        }
    }

    /// JSON payload sent (encrypted) to the generate endpoint.
    ///
    /// Raw identifiers are hashed; the opt-out check is always requested.
    pub fn to_payload(&self) -> String {
        let mut payload = serde_json::Map::new();
        payload.insert(self.payload_key().to_string(), json!(self.payload_value()));
        payload.insert("optout_check".to_string(), json!(1));
        serde_json::Value::Object(payload).to_string()
    }
}
