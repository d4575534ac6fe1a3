//! Builders
//!
//! Fluent builder patterns for identity configuration.

pub mod config;

pub use config::{identity_config, IdentityConfigBuilder};
