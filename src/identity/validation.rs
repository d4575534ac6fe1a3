//! Identity Validation
//!
//! Classification of a candidate identity against the current time.

use crate::types::{Identity, IdentityPackage, IdentityStatus};

/// Classify `identity` at `now_ms`. The first matching rule wins:
///
/// 1. absent: `NoIdentity`
/// 2. empty advertising or refresh token: `Invalid`
/// 3. refresh token expired: `RefreshExpired`
/// 4. advertising token expired: `Expired`, still valid for refreshing
/// 5. `is_new`: `Established`, otherwise `Refreshed`
pub fn validate(identity: Option<&Identity>, is_new: bool, now_ms: i64) -> IdentityPackage {
    let Some(identity) = identity else {
        return invalid(IdentityStatus::NoIdentity, "Identity not available");
    };

    if identity.advertising_token.is_empty() {
        return invalid(IdentityStatus::Invalid, "advertising_token is not available or is not valid");
    }

    if identity.refresh_token.is_empty() {
        return invalid(IdentityStatus::Invalid, "refresh_token is not available or is not valid");
    }

    if now_ms >= identity.refresh_expires {
        return invalid(IdentityStatus::RefreshExpired, "Identity expired, refresh expired");
    }

    if now_ms >= identity.identity_expires {
        return IdentityPackage {
            valid: true,
            identity: Some(identity.clone()),
            status: IdentityStatus::Expired,
            message: "Identity expired, refresh still valid",
        };
    }

    if is_new {
        IdentityPackage {
            valid: true,
            identity: Some(identity.clone()),
            status: IdentityStatus::Established,
            message: "Identity established",
        }
    } else {
        IdentityPackage {
            valid: true,
            identity: Some(identity.clone()),
            status: IdentityStatus::Refreshed,
            message: "Identity refreshed",
        }
    }
}

fn invalid(status: IdentityStatus, message: &'static str) -> IdentityPackage {
    IdentityPackage {
        valid: false,
        identity: None,
        status,
        message,
    }
}
