//! Local record store
//!
//! The whole garage is persisted as one JSON document (`garage.json`).
//! Writes are atomic (write to temp file, then rename) so a crash never
//! leaves a half-written collection behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::Garage;
use crate::storage::error::{StorageError, StorageResult};

/// Durable storage for the record collection
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    quota_bytes: u64,
}

impl RecordStore {
    /// Create a record store backed by `path`, refusing documents larger
    /// than `quota_bytes`
    pub fn new(path: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            path: path.into(),
            quota_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a collection has been written yet
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the collection
    ///
    /// A missing file is an empty garage. A malformed file is discarded and
    /// also read as an empty garage; only I/O failures are errors.
    pub fn load(&self) -> StorageResult<Garage> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Garage::new()),
            Err(e) => {
                return Err(StorageError::ReadError {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(garage) => Ok(garage),
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Discarding corrupt garage file");
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::debug!(error = %e, "Could not remove corrupt garage file");
                }
                Ok(Garage::new())
            }
        }
    }

    /// Replace the stored collection
    ///
    /// Fails with [`StorageError::QuotaExceeded`] when the serialized
    /// collection does not fit in the quota. Nothing is written in that case.
    pub fn save(&self, garage: &Garage) -> StorageResult<()> {
        let bytes = serde_json::to_vec(garage)?;
        let size = bytes.len() as u64;
        if size > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                path: self.path.clone(),
                size,
                limit: self.quota_bytes,
            });
        }

        atomic_write(&self.path, &bytes)?;
        tracing::debug!(cars = garage.len(), bytes = size, "Saved garage");
        Ok(())
    }

    /// Remove the stored collection
    pub fn clear(&self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, self.path.clone())),
        }
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| StorageError::AtomicWriteFailed {
        from: temp_path,
        to: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Car;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> RecordStore {
        RecordStore::new(temp_dir.path().join("garage.json"), 1024 * 1024)
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        assert!(!store.exists());
        assert!(store.load().unwrap().is_empty());

        let mut garage = Garage::new();
        garage
            .add(Car::new("Fiat", "Uno", "Escada").with_plate("ABC-1234"))
            .unwrap();
        store.save(&garage).unwrap();

        assert!(store.exists());
        assert_eq!(store.load().unwrap(), garage);
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        fs::write(store.path(), b"{not json").unwrap();

        assert!(store.load().unwrap().is_empty());
        // The corrupt document is discarded
        assert!(!store.exists());
    }

    #[test]
    fn test_legacy_single_object_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        fs::write(
            store.path(),
            br#"{"brand":"VW","model":"Fusca","nick":"Herbie","imgId":"img_1"}"#,
        )
        .unwrap();

        let garage = store.load().unwrap();
        assert_eq!(garage.len(), 1);
        assert_eq!(garage.cars()[0].nickname, "Herbie");
        assert_eq!(garage.cars()[0].image_ref(), Some("img_1"));
    }

    #[test]
    fn test_quota_exceeded_keeps_previous_data() {
        let temp_dir = TempDir::new().unwrap();
        let store = RecordStore::new(temp_dir.path().join("garage.json"), 200);

        let small: Garage = vec![Car::new("A", "1", "a")].into();
        store.save(&small).unwrap();

        let big: Garage = (0..20)
            .map(|i| Car::new("Brand", "Model", format!("car {}", i)))
            .collect();
        let err = store.save(&big).unwrap_err();
        assert!(err.is_storage_full());
        assert_eq!(store.load().unwrap(), small);
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.clear().unwrap();

        store.save(&vec![Car::new("A", "1", "a")].into()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("file.txt");

        atomic_write(&nested_path, b"test data").unwrap();

        assert_eq!(fs::read_to_string(&nested_path).unwrap(), "test data");
        assert!(!nested_path.with_extension("tmp").exists());
    }
}
