//! UID2 Error Types
//!
//! Error hierarchy for identity generation, refresh and persistence.

use std::time::Duration;
use thiserror::Error;

/// Root error type for the UID2 integration.
#[derive(Error, Debug)]
pub enum UID2Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl UID2Error {
    /// Stable error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "UID2_CONFIG",
            Self::Network(_) => "UID2_NETWORK",
            Self::Crypto(CryptoError::PayloadDecrypt) => "UID2_DECRYPT",
            Self::Crypto(_) => "UID2_CRYPTO",
            Self::Protocol(_) => "UID2_PAYLOAD",
            Self::Input(_) => "UID2_INPUT",
            Self::Storage(_) => "UID2_STORAGE",
        }
    }

    /// Check if a refresh that failed with this error should be attempted again.
    ///
    /// Configuration and input errors stop the retry chain.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::Input(_) => false,
            Self::Network(e) => e.is_retryable(),
            Self::Crypto(_) | Self::Protocol(_) | Self::Storage(_) => true,
        }
    }

    /// Check if error was caused by a failed decryption of a response envelope.
    pub fn is_decrypt_failure(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::PayloadDecrypt))
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid API URL: {url}")]
    InvalidApiUrl { url: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Request failed with HTTP status {status}")]
    RequestFailed { status: u16 },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnexpectedRedirect { .. })
    }

    /// HTTP status associated with the failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status } => Some(*status),
            _ => None,
        }
    }
}

/// Cryptographic error.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encrypted payload could not be decrypted")]
    PayloadDecrypt,

    #[error("Invalid server public key: {message}")]
    InvalidPublicKey { message: String },

    #[error("Key pair generation failed")]
    KeyGeneration,

    #[error("Key agreement failed")]
    KeyAgreement,

    #[error("Encryption failed: {message}")]
    Encryption { message: String },
}

/// Response payload error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unknown response status: {status}")]
    UnknownStatus { status: String },

    #[error("Request rejected with status {status}: {}", message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: String,
        message: Option<String>,
    },
}

/// Caller input validation error.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Invalid email address detected")]
    InvalidEmail,

    #[error("Phone number is not normalized to ITU E.164 standard")]
    InvalidPhone,
}

/// Storage error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },
}

/// Result type for UID2 operations.
pub type UID2Result<T> = Result<T, UID2Error>;
