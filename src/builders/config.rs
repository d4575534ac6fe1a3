//! Configuration Builder
//!
//! Fluent builder for identity configuration.

use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, UID2Error};
use crate::resilience::RefreshRetryConfig;
use crate::types::{ClientConfig, Environment, IdentityConfig, ManagerConfig};

/// Identity configuration builder.
#[derive(Default)]
pub struct IdentityConfigBuilder {
    client: ClientConfig,
    manager: ManagerConfig,
}

impl IdentityConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service deployment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.client.environment = environment;
        self
    }

    /// Use a custom service base URL.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.client.environment = Environment::Custom(url.into());
        self
    }

    /// Set the application name sent with generate requests.
    pub fn application_id(mut self, application_id: impl Into<String>) -> Self {
        self.client.application_id = application_id.into();
        self
    }

    /// Set the platform reported in the client version header.
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.client.platform = platform.into();
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = timeout;
        self
    }

    /// Enable or disable automatic refresh.
    pub fn automatic_refresh(mut self, enabled: bool) -> Self {
        self.manager.automatic_refresh_enabled = enabled;
        self
    }

    /// Enable or disable the expiration checks.
    pub fn check_expiration(mut self, enabled: bool) -> Self {
        self.manager.check_expiration = enabled;
        self
    }

    /// Set the tolerance added to expiry timestamps.
    pub fn expiration_tolerance(mut self, tolerance: Duration) -> Self {
        self.manager.expiration_tolerance = tolerance;
        self
    }

    /// Set the refresh retry policy.
    pub fn retry(mut self, retry: RefreshRetryConfig) -> Self {
        self.manager.retry = retry;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<IdentityConfig, UID2Error> {
        let url = self.client.environment.server_url();
        Url::parse(url).map_err(|_| ConfigurationError::InvalidApiUrl {
            url: url.to_string(),
        })?;

        if self.client.platform.is_empty() {
            return Err(ConfigurationError::MissingField {
                field: "platform".to_string(),
            }
            .into());
        }

        if self.client.timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfig {
                message: "timeout must be greater than zero".to_string(),
            }
            .into());
        }

        Ok(IdentityConfig {
            client: self.client,
            manager: self.manager,
        })
    }
}

/// Create a new identity configuration builder.
pub fn identity_config() -> IdentityConfigBuilder {
    IdentityConfigBuilder::new()
}
