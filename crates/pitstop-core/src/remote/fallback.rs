//! Local stand-in for the cloud document store
//!
//! Keeps every user's garage in one JSON file on this device, mapping
//! id to `{"_d": data, "_ts": millis}`. Used when no cloud backend is
//! configured but the sync path should still be exercised.
//!
//! The file has a size budget. When a write would exceed it, the least
//! recently touched documents (20%, at least one) are dropped and the write
//! is retried once. The document being written is never dropped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Garage;
use crate::storage::{atomic_write, StorageError};

use super::store::{DocumentStore, RemoteError, RemoteResult};

/// Share of documents dropped per pruning round
const PRUNE_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stamped {
    #[serde(rename = "_d")]
    data: Value,
    #[serde(rename = "_ts", default)]
    touched_at: i64,
}

/// A stored document, stamped or as written by older versions
#[derive(Debug, Clone)]
enum StoredDocument {
    Stamped(Stamped),
    Legacy(Value),
}

impl StoredDocument {
    fn touched_at(&self) -> i64 {
        match self {
            StoredDocument::Stamped(s) => s.touched_at,
            StoredDocument::Legacy(_) => 0,
        }
    }

    fn data(&self) -> &Value {
        match self {
            StoredDocument::Stamped(s) => &s.data,
            StoredDocument::Legacy(v) => v,
        }
    }
}

impl Serialize for StoredDocument {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StoredDocument::Stamped(s) => s.serialize(serializer),
            StoredDocument::Legacy(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StoredDocument {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        // Only objects carrying `_d` are stamped
        if value.get("_d").is_some() {
            let stamped = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            Ok(StoredDocument::Stamped(stamped))
        } else {
            Ok(StoredDocument::Legacy(value))
        }
    }
}

type Documents = BTreeMap<String, StoredDocument>;

pub struct LocalFallbackStore {
    path: PathBuf,
    quota_bytes: u64,
    lock: Mutex<()>,
}

impl LocalFallbackStore {
    pub fn new(path: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            path: path.into(),
            quota_bytes,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all documents; an unreadable file counts as empty
    fn read_all(&self) -> Documents {
        let Ok(bytes) = fs::read(&self.path) else {
            return Documents::new();
        };
        match serde_json::from_slice(&bytes) {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Ignoring corrupt fallback store");
                Documents::new()
            }
        }
    }

    fn write_all(&self, docs: &Documents) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(docs)?;
        let size = bytes.len() as u64;
        if size > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                path: self.path.clone(),
                size,
                limit: self.quota_bytes,
            });
        }
        atomic_write(&self.path, &bytes)
    }

    fn guard(&self) -> RemoteResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| RemoteError::Storage(StorageError::LockPoisoned("fallback store")))
    }
}

/// Drop the least recently touched documents, never `preserve`
///
/// Returns whether anything was removed.
fn prune(docs: &mut Documents, preserve: &str) -> bool {
    if docs.is_empty() {
        return false;
    }

    let target = ((docs.len() as f64 * PRUNE_FRACTION).floor() as usize).max(1);
    let mut by_age: Vec<(i64, String)> = docs
        .iter()
        .filter(|(id, _)| id.as_str() != preserve)
        .map(|(id, doc)| (doc.touched_at(), id.clone()))
        .collect();
    by_age.sort();

    let victims: Vec<String> = by_age.into_iter().take(target).map(|(_, id)| id).collect();
    for id in &victims {
        docs.remove(id);
    }
    if !victims.is_empty() {
        tracing::info!(removed = victims.len(), "Pruned fallback store");
    }
    !victims.is_empty()
}

#[async_trait]
impl DocumentStore for LocalFallbackStore {
    async fn upsert(&self, id: &str, data: &Garage) -> RemoteResult<()> {
        let _guard = self.guard()?;
        let mut docs = self.read_all();
        docs.insert(
            id.to_string(),
            StoredDocument::Stamped(Stamped {
                data: serde_json::to_value(data)?,
                touched_at: Utc::now().timestamp_millis(),
            }),
        );

        match self.write_all(&docs) {
            Ok(()) => Ok(()),
            Err(e) if e.is_storage_full() => {
                tracing::warn!("Fallback store over quota, cleaning up old data");
                if prune(&mut docs, id) {
                    if self.write_all(&docs).is_ok() {
                        return Ok(());
                    }
                    tracing::error!("Cleanup did not free enough space");
                }
                Err(RemoteError::Storage(e))
            }
            Err(e) => Err(RemoteError::Storage(e)),
        }
    }

    async fn get_by_id(&self, id: &str) -> RemoteResult<Option<Garage>> {
        let _guard = self.guard()?;
        let mut docs = self.read_all();
        let Some(doc) = docs.get_mut(id) else {
            return Ok(None);
        };

        let garage: Garage = serde_json::from_value(doc.data().clone())?;

        if let StoredDocument::Stamped(stamped) = doc {
            stamped.touched_at = Utc::now().timestamp_millis();
            if let Err(e) = self.write_all(&docs) {
                tracing::debug!(error = %e, "Could not refresh fallback timestamp");
            }
        }

        Ok(Some(garage))
    }

    async fn delete_by_id(&self, id: &str) -> RemoteResult<()> {
        let _guard = self.guard()?;
        let mut docs = self.read_all();
        if docs.remove(id).is_some() {
            self.write_all(&docs)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Car;
    use tempfile::TempDir;

    fn garage(nickname: &str) -> Garage {
        vec![Car::new("Fiat", "Uno", nickname)].into()
    }

    fn store(temp_dir: &TempDir, quota: u64) -> LocalFallbackStore {
        LocalFallbackStore::new(temp_dir.path().join("offline_fleets.json"), quota)
    }

    #[tokio::test]
    async fn test_upsert_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, 1024 * 1024);

        assert!(store.get_by_id("user_a").await.unwrap().is_none());

        store.upsert("user_a", &garage("Escada")).await.unwrap();
        assert_eq!(store.get_by_id("user_a").await.unwrap(), Some(garage("Escada")));

        store.upsert("user_a", &garage("Mille")).await.unwrap();
        assert_eq!(store.get_by_id("user_a").await.unwrap(), Some(garage("Mille")));

        store.delete_by_id("user_a").await.unwrap();
        assert!(store.get_by_id("user_a").await.unwrap().is_none());
        store.delete_by_id("user_a").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_shape() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, 1024 * 1024);
        store.upsert("user_a", &garage("Escada")).await.unwrap();

        let raw: Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["user_a"]["_d"][0]["nickname"], "Escada");
        assert!(raw["user_a"]["_ts"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_reads_legacy_unwrapped_documents() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, 1024 * 1024);
        fs::write(
            store.path(),
            r#"{"user_old":[{"brand":"VW","model":"Fusca","nick":"Herbie"}]}"#,
        )
        .unwrap();

        let garage = store.get_by_id("user_old").await.unwrap().unwrap();
        assert_eq!(garage.cars()[0].nickname, "Herbie");
    }

    #[tokio::test]
    async fn test_quota_prunes_oldest_but_keeps_target() {
        let temp_dir = TempDir::new().unwrap();
        let sample = store(&temp_dir, u64::MAX);
        sample.upsert("sample", &garage("x")).await.unwrap();
        let one_doc = fs::metadata(sample.path()).unwrap().len();
        fs::remove_file(sample.path()).unwrap();

        // Room for roughly five documents
        let store = store(&temp_dir, one_doc * 5 + 10);
        for i in 0..5 {
            store
                .upsert(&format!("user_{}", i), &garage("x"))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        // Touch user_0 so user_1 becomes the oldest
        store.get_by_id("user_0").await.unwrap();

        store.upsert("user_new", &garage("x")).await.unwrap();

        assert!(store.get_by_id("user_new").await.unwrap().is_some());
        assert!(store.get_by_id("user_0").await.unwrap().is_some());
        assert!(store.get_by_id("user_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_failure_when_nothing_to_prune() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, 10);

        let err = store.upsert("user_a", &garage("Escada")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Storage(ref e) if e.is_storage_full()));
        assert!(store.get_by_id("user_a").await.unwrap().is_none());
    }

    #[test]
    fn test_prune_target_and_preserve() {
        let mut docs = Documents::new();
        for i in 0..10 {
            docs.insert(
                format!("u{}", i),
                StoredDocument::Stamped(Stamped {
                    data: Value::Array(vec![]),
                    touched_at: i,
                }),
            );
        }

        assert!(prune(&mut docs, "u0"));
        // 20% of 10 is two, skipping the preserved id
        assert_eq!(docs.len(), 8);
        assert!(docs.contains_key("u0"));
        assert!(!docs.contains_key("u1"));
        assert!(!docs.contains_key("u2"));

        let mut only = Documents::new();
        only.insert("me".to_string(), StoredDocument::Legacy(Value::Null));
        assert!(!prune(&mut only, "me"));
    }
}
