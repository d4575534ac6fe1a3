//! UID2 Integration Module
//!
//! Lifecycle management for UID2 and EUID advertising identities.
//!
//! # Features
//!
//! - Identity validation and status tracking
//! - Automatic background refresh with tiered retry
//! - Expiration re-evaluation as tokens and refresh tokens lapse
//! - Encrypted refresh protocol (AES-GCM envelopes)
//! - Client-side identity generation (P-256 ECDH)
//! - Pluggable persistence, transport and time sources
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uid2_integration::{identity_config, Environment, FileIdentityStorage, IdentityManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = identity_config()
//!         .environment(Environment::Production)
//!         .application_id("com.example.app")
//!         .build()?;
//!
//!     let storage = FileIdentityStorage::in_dir("/var/lib/app", &config.client.environment);
//!     let manager = IdentityManager::new(config, Arc::new(storage))?;
//!
//!     manager.add_listener(|identity: Option<&uid2_integration::Identity>, status| {
//!         println!("status: {} (identity: {})", status, identity.is_some());
//!     });
//!     manager.wait_until_initialized().await;
//!
//!     if let Some(token) = manager.get_advertising_token() {
//!         println!("advertising token: {}", token);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: identity, status and configuration types
//! - `error`: error hierarchy
//! - `core`: HTTP transport, time source, envelope codec, key agreement, input normalization
//! - `client`: refresh and generate round trips
//! - `identity`: the identity manager, validation, storage and state events
//! - `resilience`: refresh retry policy
//! - `builders`: fluent configuration builder

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod identity;
pub mod resilience;
pub mod types;
pub mod version;

// Re-export main client
pub use client::{create_client, create_mock_client, IdentityClient, MockIdentityClient, UID2Client};

// Re-export builders
pub use builders::{identity_config, IdentityConfigBuilder};

// Re-export errors
pub use error::{
    ConfigurationError, CryptoError, InputError, NetworkError, ProtocolError, StorageError,
    UID2Error, UID2Result,
};

// Re-export types
pub use types::{
    // Config
    ClientConfig, Environment, IdentityConfig, ManagerConfig,
    // Identity
    Identity, IdentityPackage, IdentityStatus, ManagerState, ResponsePackage,
    // Request
    IdentityRequest,
};

// Re-export core components
pub use crate::core::{
    // Transport
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    ReqwestHttpTransport,
    // Time
    MockTimeSource, SystemTimeSource, TimeSource,
};

// Re-export identity management
pub use identity::{
    // Manager
    IdentityManager, IdentityStatusListener,
    // Storage
    FileIdentityStorage, IdentityStorage, InMemoryIdentityStorage, MockIdentityStorage,
};

// Re-export resilience
pub use resilience::{RefreshRetryConfig, DEFAULT_REFRESH_RETRY_CONFIG};

// Re-export version
pub use version::{parse_version, sdk_version, Version};
