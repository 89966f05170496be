//! Binary object cache
//!
//! Keeps photos out of the lightweight record store. Entries are evicted in
//! insertion order when the backing store runs out of room.
//!
//! If the backing store cannot be opened the cache degrades to a no-op:
//! reads miss and writes are dropped, so the app keeps working without
//! image persistence.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::{init_image_schema, needs_init};

/// Entries removed per eviction round
pub const PRUNE_BATCH: usize = 5;

/// A cached blob and when it was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            value,
            inserted_at: Utc::now(),
        }
    }
}

/// Durable key to blob storage behind the cache
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>>;

    /// Insert or replace `key`
    fn put(&self, key: &str, entry: &CacheEntry) -> StorageResult<()>;

    /// Remove `key`; missing keys are not an error
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Up to `n` keys, oldest insertion first
    fn oldest_keys(&self, n: usize) -> StorageResult<Vec<String>>;

    fn len(&self) -> StorageResult<usize>;
}

/// SQLite-backed blob store
///
/// When a quota is given the database is capped with `max_page_count`, so
/// writes past it fail with SQLite's "database or disk is full" error.
pub struct SqliteBlobStore {
    conn: Mutex<Connection>,
}

impl SqliteBlobStore {
    pub fn open(path: &Path, quota_bytes: Option<u64>) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Self::from_connection(Connection::open(path)?, quota_bytes)
    }

    pub fn open_in_memory(quota_bytes: Option<u64>) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, quota_bytes)
    }

    fn from_connection(conn: Connection, quota_bytes: Option<u64>) -> StorageResult<Self> {
        if needs_init(&conn) {
            init_image_schema(&conn)?;
        }

        if let Some(quota) = quota_bytes {
            let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
            let pages = (i64::try_from(quota).unwrap_or(i64::MAX) / page_size.max(1)).max(1);
            let applied: i64 =
                conn.pragma_update_and_check(None, "max_page_count", pages, |row| row.get(0))?;
            tracing::debug!(quota, pages = applied, "Capped image cache");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned("image cache"))
    }
}

impl BlobStore for SqliteBlobStore {
    fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT value, inserted_at FROM images WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(value, millis)| CacheEntry {
            value,
            inserted_at: Utc
                .timestamp_millis_opt(millis)
                .single()
                .unwrap_or_default(),
        }))
    }

    fn put(&self, key: &str, entry: &CacheEntry) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO images (key, value, inserted_at) VALUES (?1, ?2, ?3)",
            params![key, entry.value, entry.inserted_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM images WHERE key = ?1", [key])?;
        Ok(())
    }

    fn oldest_keys(&self, n: usize) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM images ORDER BY inserted_at, rowid LIMIT ?1")?;
        let keys = stmt
            .query_map([n as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn len(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Quota-aware key to blob cache
pub struct ObjectCache {
    backend: Option<Box<dyn BlobStore>>,
}

impl ObjectCache {
    /// Open the SQLite cache at `path`, degrading to a no-op cache on failure
    pub fn open(path: &Path, quota_bytes: Option<u64>) -> Self {
        match SqliteBlobStore::open(path, quota_bytes) {
            Ok(store) => Self::with_backend(Box::new(store)),
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Image cache unavailable, photos will not be stored");
                Self::disabled()
            }
        }
    }

    pub fn with_backend(backend: Box<dyn BlobStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A cache that stores nothing
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Fresh key for a new blob: millisecond timestamp plus a random suffix
    pub fn generate_key() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("img_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
    }

    /// Look up a blob; any failure reads as a miss
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let backend = self.backend.as_ref()?;
        match backend.get(key) {
            Ok(entry) => entry.map(|e| e.value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Image cache read failed");
                None
            }
        }
    }

    /// Store a blob
    ///
    /// When the store is full, the oldest [`PRUNE_BATCH`] entries are evicted
    /// and the write is retried once. A second failure is returned.
    pub fn set(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };

        match backend.put(key, &CacheEntry::new(blob.to_vec())) {
            Ok(()) => Ok(()),
            Err(e) if e.is_storage_full() => {
                tracing::info!(key, "Image cache full, evicting oldest entries");
                self.prune();
                backend.put(key, &CacheEntry::new(blob.to_vec()))
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a blob; missing keys and a disabled cache are fine
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        match self.backend.as_ref() {
            Some(backend) => backend.delete(key),
            None => Ok(()),
        }
    }

    /// Evict the oldest [`PRUNE_BATCH`] entries, returning how many went
    pub fn prune(&self) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        let keys = match backend.oldest_keys(PRUNE_BATCH) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list image cache entries for eviction");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match backend.delete(&key) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(key = %key, error = %e, "Could not evict image"),
            }
        }
        tracing::debug!(removed, "Pruned image cache");
        removed
    }

    /// Number of stored blobs (zero when disabled)
    pub fn len(&self) -> usize {
        self.backend
            .as_ref()
            .and_then(|b| b.len().ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Holds at most `capacity` blobs and rejects more with a quota error
    struct BoundedStore {
        capacity: usize,
        entries: Mutex<BTreeMap<String, (u64, CacheEntry)>>,
        seq: Mutex<u64>,
    }

    impl BoundedStore {
        fn new(capacity: usize) -> Self {
            Self {
                capacity,
                entries: Mutex::new(BTreeMap::new()),
                seq: Mutex::new(0),
            }
        }
    }

    impl BlobStore for BoundedStore {
        fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
            Ok(self.entries.lock().unwrap().get(key).map(|(_, e)| e.clone()))
        }

        fn put(&self, key: &str, entry: &CacheEntry) -> StorageResult<()> {
            let mut entries = self.entries.lock().unwrap();
            if !entries.contains_key(key) && entries.len() >= self.capacity {
                return Err(StorageError::QuotaExceeded {
                    path: "memory".into(),
                    size: entry.value.len() as u64,
                    limit: 0,
                });
            }
            let mut seq = self.seq.lock().unwrap();
            *seq += 1;
            entries.insert(key.to_string(), (*seq, entry.clone()));
            Ok(())
        }

        fn delete(&self, key: &str) -> StorageResult<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        fn oldest_keys(&self, n: usize) -> StorageResult<Vec<String>> {
            let entries = self.entries.lock().unwrap();
            let mut keys: Vec<_> = entries.iter().map(|(k, (seq, _))| (*seq, k.clone())).collect();
            keys.sort();
            Ok(keys.into_iter().take(n).map(|(_, k)| k).collect())
        }

        fn len(&self) -> StorageResult<usize> {
            Ok(self.entries.lock().unwrap().len())
        }
    }

    fn sqlite_cache() -> ObjectCache {
        ObjectCache::with_backend(Box::new(SqliteBlobStore::open_in_memory(None).unwrap()))
    }

    #[test]
    fn test_set_get_delete() {
        let cache = sqlite_cache();
        assert!(cache.get("img_1").is_none());

        cache.set("img_1", b"photo bytes").unwrap();
        assert_eq!(cache.get("img_1").unwrap(), b"photo bytes");
        assert_eq!(cache.len(), 1);

        cache.delete("img_1").unwrap();
        assert!(cache.get("img_1").is_none());
        // Idempotent
        cache.delete("img_1").unwrap();
        cache.delete("never_there").unwrap();
    }

    #[test]
    fn test_set_replaces_existing_key() {
        let cache = sqlite_cache();
        cache.set("k", b"one").unwrap();
        cache.set("k", b"two").unwrap();
        assert_eq!(cache.get("k").unwrap(), b"two");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_removes_oldest_batch() {
        let cache = sqlite_cache();
        for i in 0..8 {
            cache.set(&format!("k{}", i), b"x").unwrap();
        }

        assert_eq!(cache.prune(), PRUNE_BATCH);
        assert_eq!(cache.len(), 3);
        for i in 0..5 {
            assert!(cache.get(&format!("k{}", i)).is_none());
        }
        for i in 5..8 {
            assert!(cache.get(&format!("k{}", i)).is_some());
        }
    }

    #[test]
    fn test_set_evicts_and_retries_when_full() {
        let cache = ObjectCache::with_backend(Box::new(BoundedStore::new(10)));
        for i in 0..10 {
            cache.set(&format!("old{}", i), b"x").unwrap();
        }

        cache.set("new", b"fresh").unwrap();

        assert_eq!(cache.get("new").unwrap(), b"fresh");
        assert_eq!(cache.len(), 6);
        // The five oldest went, the rest survived
        for i in 0..5 {
            assert!(cache.get(&format!("old{}", i)).is_none());
        }
        for i in 5..10 {
            assert!(cache.get(&format!("old{}", i)).is_some());
        }
    }

    #[test]
    fn test_set_propagates_when_eviction_is_not_enough() {
        let cache = ObjectCache::with_backend(Box::new(BoundedStore::new(0)));
        let err = cache.set("new", b"fresh").unwrap_err();
        assert!(err.is_storage_full());
    }

    #[test]
    fn test_sqlite_quota_triggers_eviction() {
        let store = SqliteBlobStore::open_in_memory(Some(128 * 1024)).unwrap();
        let blob = vec![7u8; 3000];

        let mut stored = 0;
        for i in 0..1000 {
            match store.put(&format!("k{:04}", i), &CacheEntry::new(blob.clone())) {
                Ok(()) => stored += 1,
                Err(e) => {
                    assert!(e.is_storage_full(), "unexpected error: {}", e);
                    break;
                }
            }
        }
        assert!(stored > PRUNE_BATCH, "quota too small for the test");

        let cache = ObjectCache::with_backend(Box::new(store));
        cache.set("new", &blob).unwrap();

        assert!(cache.get("new").is_some());
        assert!(cache.len() >= stored + 1 - PRUNE_BATCH);
        assert!(cache.get("k0000").is_none());
    }

    #[test]
    fn test_huge_quota_does_not_cap_cache() {
        let store = SqliteBlobStore::open_in_memory(Some(u64::MAX)).unwrap();
        let blob = vec![7u8; 8192];

        for i in 0..64 {
            store.put(&format!("k{:02}", i), &CacheEntry::new(blob.clone())).unwrap();
        }
        assert!(store.get("k63").unwrap().is_some());
    }

    #[test]
    fn test_disabled_cache_is_a_no_op() {
        let cache = ObjectCache::disabled();
        assert!(!cache.is_enabled());
        cache.set("k", b"v").unwrap();
        assert!(cache.get("k").is_none());
        cache.delete("k").unwrap();
        assert_eq!(cache.prune(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_open_failure_degrades_to_no_op() {
        let temp_dir = TempDir::new().unwrap();
        // A directory cannot be opened as a database
        let cache = ObjectCache::open(temp_dir.path(), None);
        assert!(!cache.is_enabled());
        cache.set("k", b"v").unwrap();
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("images.db");

        ObjectCache::open(&path, None).set("k", b"v").unwrap();
        assert_eq!(ObjectCache::open(&path, None).get("k").unwrap(), b"v");
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let keys: std::collections::HashSet<_> =
            (0..200).map(|_| ObjectCache::generate_key()).collect();
        assert_eq!(keys.len(), 200);
        assert!(keys.iter().all(|k| k.starts_with("img_")));
    }
}
