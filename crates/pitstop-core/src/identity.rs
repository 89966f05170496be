//! Per-install user identity
//!
//! The user id keys the garage document in the remote store. It is
//! generated on first use and kept in a small file under the data
//! directory, so it is stable across restarts. Users can replace it to
//! pick up a garage saved from another device.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::{atomic_write, StorageError, StorageResult};

/// Prefix of generated ids
const USER_ID_PREFIX: &str = "user_";

/// Random characters after the prefix
const USER_ID_RANDOM_LEN: usize = 9;

/// Lazily generated, persisted user id
pub struct UserIdentity {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl UserIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current user id, generating and persisting one on first access
    ///
    /// If the id cannot be written it is still kept for this session.
    pub fn user_id(&self) -> String {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match self.read_stored() {
            Some(id) => id,
            None => {
                let id = generate_user_id();
                match atomic_write(&self.path, id.as_bytes()) {
                    Ok(()) => tracing::info!(user_id = %id, "Generated new user id"),
                    Err(e) => tracing::warn!(error = %e, "Could not persist user id"),
                }
                id
            }
        };

        *cached = Some(id.clone());
        id
    }

    /// Replace the user id
    ///
    /// The value is trimmed. Returns `Ok(false)` and changes nothing when it
    /// is empty after trimming.
    pub fn set_user_id(&self, id: &str) -> StorageResult<bool> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(false);
        }

        atomic_write(&self.path, id.as_bytes())?;
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| StorageError::LockPoisoned("user identity"))?;
        *cached = Some(id.to_string());
        tracing::info!(user_id = %id, "User id changed");
        Ok(true)
    }

    fn read_stored(&self) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        let id = content.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// `user_` followed by nine random lowercase alphanumerics
fn generate_user_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", USER_ID_PREFIX, &random[..USER_ID_RANDOM_LEN])
}
