//! Storage error handling
//!
//! Every local store reports through [`StorageError`]. The one condition
//! callers act on is "storage full", which covers a full disk, a store over
//! its byte budget, and SQLite refusing to grow.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// `ENOSPC` on Unix, `ERROR_DISK_FULL` on Windows
#[cfg(unix)]
const OS_DISK_FULL: i32 = 28;
#[cfg(windows)]
const OS_DISK_FULL: i32 = 112;
#[cfg(not(any(unix, windows)))]
const OS_DISK_FULL: i32 = -1;

/// Errors that can occur during local storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The device has no room left
    #[error("Disk full while writing to '{path}'")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Payload is larger than the store's size budget
    #[error("Storage quota exceeded for '{path}': {size} bytes needed, {limit} allowed")]
    QuotaExceeded { path: PathBuf, size: u64, limit: u64 },

    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temp file was written but could not replace the target
    #[error("Could not move '{from}' into place at '{to}': {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A thread panicked while holding a store lock
    #[error("Storage lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl StorageError {
    /// Wrap a failed write to `path`, recognising a full disk
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            StorageError::PermissionDenied {
                path,
                source: error,
            }
        } else if is_disk_full_error(&error) {
            StorageError::DiskFull {
                path,
                source: error,
            }
        } else {
            StorageError::WriteError {
                path,
                source: error,
            }
        }
    }

    /// Whether the device or the store ran out of room
    pub fn is_storage_full(&self) -> bool {
        match self {
            StorageError::DiskFull { .. } | StorageError::QuotaExceeded { .. } => true,
            StorageError::Database(e) => is_sqlite_full(e),
            _ => false,
        }
    }

    /// Message suited to show the user, if there is something they can do
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        if self.is_storage_full() {
            return Some("Storage full! Try removing some old vehicles.");
        }
        match self {
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                Some("Check that the data directory exists and is writable.")
            }
            _ => None,
        }
    }
}

/// SQLite's "database or disk is full"
pub(crate) fn is_sqlite_full(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::DiskFull
    )
}

fn is_disk_full_error(error: &io::Error) -> bool {
    if error.raw_os_error() == Some(OS_DISK_FULL) {
        return true;
    }
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left") || msg.contains("disk full")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_disk_is_storage_full() {
        let err = StorageError::from_io(
            io::Error::new(io::ErrorKind::Other, "No space left on device"),
            PathBuf::from("/data/garage.json"),
        );
        assert!(matches!(err, StorageError::DiskFull { .. }));
        assert!(err.is_storage_full());
        assert_eq!(
            err.recovery_suggestion(),
            Some("Storage full! Try removing some old vehicles.")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_enospc_is_storage_full() {
        let err = StorageError::from_io(
            io::Error::from_raw_os_error(28),
            PathBuf::from("/data/garage.json"),
        );
        assert!(err.is_storage_full());
    }

    #[test]
    fn test_quota_exceeded_is_storage_full() {
        let err = StorageError::QuotaExceeded {
            path: PathBuf::from("/data/garage.json"),
            size: 10,
            limit: 5,
        };
        assert!(err.is_storage_full());
        assert!(err.to_string().contains("10 bytes needed"));
    }

    #[test]
    fn test_sqlite_full_is_storage_full() {
        let err = StorageError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(err.is_storage_full());

        let other = StorageError::Database(rusqlite::Error::QueryReturnedNoRows);
        assert!(!other.is_storage_full());
        assert!(other.recovery_suggestion().is_none());
    }

    #[test]
    fn test_permission_denied() {
        let err = StorageError::from_io(
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            PathBuf::from("/data/user_id"),
        );
        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(!err.is_storage_full());
        assert!(err.to_string().contains("/data/user_id"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_other_io_errors_are_write_errors() {
        let err = StorageError::from_io(
            io::Error::new(io::ErrorKind::Interrupted, "interrupted"),
            PathBuf::from("/data/garage.json"),
        );
        assert!(matches!(err, StorageError::WriteError { .. }));
    }
}
