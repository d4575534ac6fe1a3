//! Configuration Types
//!
//! Identity service endpoints, client settings and manager behaviour.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::RefreshRetryConfig;

/// Identity service deployment to talk to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// UID2 production, auto-routed.
    Production,
    /// UID2 AWS US East (Ohio).
    Ohio,
    /// UID2 AWS US West (Oregon).
    Oregon,
    /// UID2 AWS Asia Pacific (Singapore).
    Singapore,
    /// UID2 AWS Asia Pacific (Sydney).
    Sydney,
    /// UID2 AWS Asia Pacific (Tokyo).
    Tokyo,
    /// EUID production.
    EuidProduction,
    /// EUID AWS EU West (London).
    EuidLondon,
    /// Any other base URL, such as an integration environment.
    Custom(String),
}

impl Environment {
    /// Base URL of the identity service.
    pub fn server_url(&self) -> &str {
        match self {
            Self::Production | Self::Ohio => "https://prod.uidapi.com",
            Self::Oregon => "https://usw.prod.uidapi.com",
            Self::Singapore => "https://sg.prod.uidapi.com",
            Self::Sydney => "https://au.prod.uidapi.com",
            Self::Tokyo => "https://jp.prod.uidapi.com",
            Self::EuidProduction | Self::EuidLondon => "https://prod.euid.eu/v2",
            Self::Custom(url) => url,
        }
    }

    /// Whether this is an EUID deployment.
    pub fn is_euid(&self) -> bool {
        matches!(self, Self::EuidProduction | Self::EuidLondon)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Production
    }
}

/// Refresh protocol client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Service deployment.
    pub environment: Environment,
    /// Application name sent with generate requests.
    pub application_id: String,
    /// Platform reported in the client version header.
    pub platform: String,
    /// HTTP timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            application_id: DEFAULT_APPLICATION_ID.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Identity manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Refresh the identity in the background once `refresh_from` is reached.
    pub automatic_refresh_enabled: bool,
    /// Re-evaluate the identity when it or its refresh token expires.
    pub check_expiration: bool,
    /// Added to expiry timestamps before re-evaluating.
    pub expiration_tolerance: Duration,
    /// Backoff for failed refreshes.
    pub retry: RefreshRetryConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            automatic_refresh_enabled: true,
            check_expiration: true,
            expiration_tolerance: Duration::from_millis(DEFAULT_EXPIRATION_TOLERANCE_MS),
            retry: RefreshRetryConfig::default(),
        }
    }
}

/// Complete configuration.
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    pub client: ClientConfig,
    pub manager: ManagerConfig,
}

/// Default configuration values.
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_EXPIRATION_TOLERANCE_MS: u64 = 50;
pub const DEFAULT_PLATFORM: &str = "Rust";
pub const DEFAULT_APPLICATION_ID: &str = "unknown";

/// Default identity file names.
pub const UID2_IDENTITY_FILE: &str = "uid2_identity.json";
pub const EUID_IDENTITY_FILE: &str = "euid_identity.json";
