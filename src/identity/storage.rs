//! Identity Storage
//!
//! Persistence of the last known identity and its status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, UID2Error};
use crate::types::{Environment, Identity, IdentityStatus, EUID_IDENTITY_FILE, UID2_IDENTITY_FILE};

/// Identity storage interface.
///
/// Implementations must be safe to call from a background task.
#[async_trait]
pub trait IdentityStorage: Send + Sync {
    /// Store the identity and its status, replacing any previous one.
    async fn save(&self, identity: &Identity, status: IdentityStatus) -> Result<(), UID2Error>;

    /// Load the stored identity. An empty store yields `(None, NoIdentity)`.
    async fn load(&self) -> Result<(Option<Identity>, IdentityStatus), UID2Error>;

    /// Remove the stored identity. Returns whether anything was removed.
    async fn clear(&self) -> Result<bool, UID2Error>;
}

/// In-memory identity storage implementation.
#[derive(Default)]
pub struct InMemoryIdentityStorage {
    stored: Mutex<Option<(Identity, IdentityStatus)>>,
}

impl InMemoryIdentityStorage {
    /// Create new in-memory identity storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStorage for InMemoryIdentityStorage {
    async fn save(&self, identity: &Identity, status: IdentityStatus) -> Result<(), UID2Error> {
        *self.stored.lock() = Some((identity.clone(), status));
        Ok(())
    }

    async fn load(&self) -> Result<(Option<Identity>, IdentityStatus), UID2Error> {
        Ok(match self.stored.lock().clone() {
            Some((identity, status)) => (Some(identity), status),
            None => (None, IdentityStatus::NoIdentity),
        })
    }

    async fn clear(&self) -> Result<bool, UID2Error> {
        Ok(self.stored.lock().take().is_some())
    }
}

/// On-disk layout: the identity fields plus the integer status.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(flatten)]
    identity: Identity,
    identity_status: IdentityStatus,
}

/// File-backed identity storage holding a single JSON document.
pub struct FileIdentityStorage {
    path: PathBuf,
}

impl FileIdentityStorage {
    /// Create storage backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create storage in `dir` using the default file name for `environment`.
    pub fn in_dir(dir: impl AsRef<Path>, environment: &Environment) -> Self {
        let file_name = if environment.is_euid() {
            EUID_IDENTITY_FILE
        } else {
            UID2_IDENTITY_FILE
        };
        Self::new(dir.as_ref().join(file_name))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentityStorage for FileIdentityStorage {
    async fn save(&self, identity: &Identity, status: IdentityStatus) -> Result<(), UID2Error> {
        let stored = StoredIdentity {
            identity: identity.clone(),
            identity_status: status,
        };
        let json = serde_json::to_vec(&stored).map_err(|e| StorageError::WriteFailed {
            message: e.to_string(),
        })?;

        // Write then rename so a crash never leaves a truncated document.
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: e.to_string(),
            })?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: e.to_string(),
            })?;

        debug!(path = %self.path.display(), %status, "Identity saved");
        Ok(())
    }

    async fn load(&self) -> Result<(Option<Identity>, IdentityStatus), UID2Error> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok((None, IdentityStatus::NoIdentity))
            }
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    message: e.to_string(),
                }
                .into())
            }
        };

        match serde_json::from_slice::<StoredIdentity>(&data) {
            Ok(stored) => Ok((Some(stored.identity), stored.identity_status)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable identity file");
                Ok((None, IdentityStatus::NoIdentity))
            }
        }
    }

    async fn clear(&self) -> Result<bool, UID2Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed {
                message: e.to_string(),
            }
            .into()),
        }
    }
}

/// Mock identity storage for testing.
#[derive(Default)]
pub struct MockIdentityStorage {
    stored: Mutex<Option<(Identity, IdentityStatus)>>,
    save_history: Mutex<Vec<(Identity, IdentityStatus)>>,
    load_count: Mutex<usize>,
    clear_count: Mutex<usize>,
    next_error: Mutex<Option<UID2Error>>,
    should_fail: Mutex<bool>,
}

impl MockIdentityStorage {
    /// Create new mock identity storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the stored identity.
    pub fn with_identity(identity: Identity, status: IdentityStatus) -> Self {
        let storage = Self::new();
        *storage.stored.lock() = Some((identity, status));
        storage
    }

    /// Set next error to return.
    pub fn set_next_error(&self, error: UID2Error) -> &Self {
        *self.next_error.lock() = Some(error);
        self
    }

    /// Set storage to fail all operations.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *self.should_fail.lock() = should_fail;
        self
    }

    /// Currently stored identity and status.
    pub fn stored(&self) -> Option<(Identity, IdentityStatus)> {
        self.stored.lock().clone()
    }

    /// Get save history.
    pub fn get_save_history(&self) -> Vec<(Identity, IdentityStatus)> {
        self.save_history.lock().clone()
    }

    /// Number of load calls.
    pub fn load_count(&self) -> usize {
        *self.load_count.lock()
    }

    /// Number of clear calls.
    pub fn clear_count(&self) -> usize {
        *self.clear_count.lock()
    }

    fn check_error(&self) -> Result<(), UID2Error> {
        if *self.should_fail.lock() {
            return Err(StorageError::WriteFailed {
                message: "Mock storage failure".to_string(),
            }
            .into());
        }

        if let Some(error) = self.next_error.lock().take() {
            return Err(error);
        }

        Ok(())
    }
}

#[async_trait]
impl IdentityStorage for MockIdentityStorage {
    async fn save(&self, identity: &Identity, status: IdentityStatus) -> Result<(), UID2Error> {
        self.save_history.lock().push((identity.clone(), status));
        self.check_error()?;

        *self.stored.lock() = Some((identity.clone(), status));
        Ok(())
    }

    async fn load(&self) -> Result<(Option<Identity>, IdentityStatus), UID2Error> {
        *self.load_count.lock() += 1;
        self.check_error()?;

        Ok(match self.stored.lock().clone() {
            Some((identity, status)) => (Some(identity), status),
            None => (None, IdentityStatus::NoIdentity),
        })
    }

    async fn clear(&self) -> Result<bool, UID2Error> {
        *self.clear_count.lock() += 1;
        self.check_error()?;

        Ok(self.stored.lock().take().is_some())
    }
}

/// Create in-memory identity storage.
pub fn create_storage() -> InMemoryIdentityStorage {
    InMemoryIdentityStorage::new()
}

/// Create mock identity storage for testing.
pub fn create_mock_storage() -> MockIdentityStorage {
    MockIdentityStorage::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new("ad", "rt", 2_000, 1_000, 3_000, "key")
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryIdentityStorage::new();
        assert_eq!(storage.load().await.unwrap(), (None, IdentityStatus::NoIdentity));

        storage
            .save(&identity(), IdentityStatus::Established)
            .await
            .unwrap();
        assert_eq!(
            storage.load().await.unwrap(),
            (Some(identity()), IdentityStatus::Established)
        );

        assert!(storage.clear().await.unwrap());
        assert!(!storage.clear().await.unwrap());
        assert_eq!(storage.load().await.unwrap().0, None);
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileIdentityStorage::in_dir(dir.path(), &Environment::Production);
        assert!(storage.path().ends_with(UID2_IDENTITY_FILE));

        assert_eq!(storage.load().await.unwrap(), (None, IdentityStatus::NoIdentity));

        storage
            .save(&identity(), IdentityStatus::Refreshed)
            .await
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(storage.path()).unwrap()).unwrap();
        assert_eq!(raw["identity_status"], serde_json::json!(1));
        assert_eq!(raw["advertising_token"], serde_json::json!("ad"));

        assert_eq!(
            storage.load().await.unwrap(),
            (Some(identity()), IdentityStatus::Refreshed)
        );

        assert!(storage.clear().await.unwrap());
        assert!(!storage.path().exists());
        assert!(!storage.clear().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_storage_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileIdentityStorage::in_dir(dir.path(), &Environment::EuidProduction);
        assert!(storage.path().ends_with(EUID_IDENTITY_FILE));

        std::fs::write(storage.path(), b"{ not json").unwrap();
        assert_eq!(storage.load().await.unwrap(), (None, IdentityStatus::NoIdentity));
    }

    #[tokio::test]
    async fn test_mock_storage_failure() {
        let storage = MockIdentityStorage::new();
        storage.set_should_fail(true);

        assert!(storage
            .save(&identity(), IdentityStatus::Established)
            .await
            .is_err());
        assert_eq!(storage.get_save_history().len(), 1);
        assert!(storage.stored().is_none());

        storage.set_should_fail(false);
        storage.set_next_error(
            StorageError::DeleteFailed {
                message: "nope".to_string(),
            }
            .into(),
        );
        assert!(storage.clear().await.is_err());
        assert!(storage.clear().await.is_ok());
        assert_eq!(storage.clear_count(), 2);
    }
}
