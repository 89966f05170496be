//! Garage repository
//!
//! The façade the rest of the app talks to. Owns the local/remote
//! reconciliation policy:
//!
//! - Reads are local first. Remote data replaces local data only when no
//!   queued writes are waiting, so a stale remote copy never overwrites
//!   unsynced edits.
//! - Writes land locally before returning. Photos are moved into the image
//!   cache and the record keeps only the cache key. The remote copy is sent
//!   in the background with photos inlined again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::models::{Car, Garage, GarageError, Photo};
use crate::storage::{ObjectCache, RecordStore, StorageError, StorageResult};
use crate::sync::{RemoteSyncClient, SaveOutcome, SnapshotProvider};

/// Errors from garage edits through the repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Garage(#[from] GarageError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RepositoryError {
    pub fn is_storage_full(&self) -> bool {
        matches!(self, RepositoryError::Storage(e) if e.is_storage_full())
    }

    /// Message to show the user
    pub fn user_message(&self) -> String {
        match self {
            RepositoryError::Storage(e) => e
                .recovery_suggestion()
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string()),
            RepositoryError::Garage(e) => e.to_string(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

pub struct GarageRepository {
    records: RecordStore,
    cache: Arc<ObjectCache>,
    remote: RemoteSyncClient,
    remote_tasks: Mutex<JoinSet<()>>,
    remote_gate: Arc<tokio::sync::Mutex<()>>,
}

impl GarageRepository {
    pub fn new(records: RecordStore, cache: Arc<ObjectCache>, remote: RemoteSyncClient) -> Self {
        Self {
            records,
            cache,
            remote,
            remote_tasks: Mutex::new(JoinSet::new()),
            remote_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Connect the remote store and start automatic replay
    ///
    /// A remote that cannot be initialized is logged and skipped; the
    /// repository keeps working local-only.
    pub fn init(&self) {
        if let Err(e) = self.remote.init() {
            tracing::warn!(error = %e, "Remote sync unavailable, running local-only");
        }

        let records = self.records.clone();
        let cache = self.cache.clone();
        let snapshot: SnapshotProvider = Arc::new(move || {
            let records = records.clone();
            let cache = cache.clone();
            async move { rehydrate(&cache, &load_or_empty(&records)) }.boxed()
        });
        self.remote.setup_auto_sync(Some(snapshot));
    }

    pub fn remote(&self) -> &RemoteSyncClient {
        &self.remote
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn remote_user_id(&self) -> String {
        self.remote.user_id()
    }

    pub fn set_remote_user_id(&self, id: &str) -> StorageResult<bool> {
        self.remote.set_user_id(id)
    }

    pub fn is_pending(&self) -> bool {
        self.remote.is_pending()
    }

    /// The locally stored garage, without touching the remote
    pub fn load_local(&self) -> Garage {
        load_or_empty(&self.records)
    }

    /// Load the garage
    ///
    /// With writes pending, the local garage is returned at once and pushed
    /// to the remote in the background. Otherwise a remote copy, if there
    /// is one, replaces the local garage. Never fails.
    pub async fn load(&self) -> Garage {
        let local = self.load_local();

        if self.remote.is_pending() {
            tracing::info!("Pending sync detected, scheduling upload");
            let full = self.rehydrate_images(&local);
            self.spawn_remote_save(full);
            return local;
        }

        match self.remote.load().await {
            Some(remote) => {
                tracing::info!(cars = remote.len(), "Remote garage found, updating local copy");
                match self.save_local(&remote) {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not store remote garage locally");
                        remote
                    }
                }
            }
            None => local,
        }
    }

    /// Persist the garage
    ///
    /// The local write happens before this returns; its failure (for
    /// example "storage full") is returned to the caller. The remote write
    /// runs in the background and never affects the result.
    pub async fn save(&self, garage: &Garage, save_local: bool, save_remote: bool) -> StorageResult<()> {
        let remote_copy = save_remote.then(|| self.rehydrate_images(garage));

        let local_result = if save_local {
            self.save_local(garage).map(|_| ())
        } else {
            Ok(())
        };

        if let Some(full) = remote_copy {
            self.spawn_remote_save(full);
        }

        if let Err(e) = &local_result {
            tracing::error!(error = %e, "Local save failed");
        }
        local_result
    }

    /// Add a car and persist
    pub async fn add_car(&self, garage: &mut Garage, car: Car) -> RepositoryResult<()> {
        let mut next = garage.clone();
        next.add(car)?;
        self.save(&next, true, true).await?;
        *garage = self.load_local();
        Ok(())
    }

    /// Edit the car at `index` and persist
    ///
    /// Replacing the photo drops the old image from the cache.
    pub async fn update_car<F>(&self, garage: &mut Garage, index: usize, edit: F) -> RepositoryResult<()>
    where
        F: FnOnce(&mut Car),
    {
        let mut next = garage.clone();
        next.update(index, edit)?;
        self.save(&next, true, true).await?;
        *garage = self.load_local();
        Ok(())
    }

    /// Remove the car at `index` and persist
    ///
    /// The returned car has its photo inlined, so it can be handed back to
    /// [`GarageRepository::restore_car`] after its cache entry is gone.
    pub async fn remove_car(&self, garage: &mut Garage, index: usize) -> RepositoryResult<Car> {
        let mut next = garage.clone();
        let removed = rehydrate_car(&self.cache, next.remove(index)?);
        self.save(&next, true, true).await?;
        *garage = next;
        Ok(removed)
    }

    /// Undo a removal, putting the car back at `index`
    pub async fn restore_car(&self, garage: &mut Garage, index: usize, car: Car) -> RepositoryResult<()> {
        let mut next = garage.clone();
        next.restore(index, car);
        self.save(&next, true, true).await?;
        *garage = self.load_local();
        Ok(())
    }

    /// Copy of `garage` with cached photos inlined, for remote transmission
    pub fn rehydrate_images(&self, garage: &Garage) -> Garage {
        rehydrate(&self.cache, garage)
    }

    /// Wait for background remote saves to finish
    pub async fn wait_remote_idle(&self) {
        let mut tasks = {
            let mut guard = match self.remote_tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Background remote save ended abnormally");
            }
        }
    }

    /// Stop background work: wait for remote saves, then stop auto-sync
    pub async fn shutdown(&self) {
        self.wait_remote_idle().await;
        self.remote.shutdown().await;
    }

    /// Split photos into the cache and write the records
    ///
    /// Returns the garage as stored. Images only the previous garage
    /// referenced are deleted afterwards.
    fn save_local(&self, garage: &Garage) -> StorageResult<Garage> {
        let previous_refs: HashSet<String> = self
            .load_local()
            .image_refs()
            .map(str::to_string)
            .collect();

        let mut new_keys = Vec::new();
        let mut stored = Vec::with_capacity(garage.len());
        for car in garage {
            let mut car = car.clone();
            if let Some(photo) = car.photo().filter(|_| self.cache.is_enabled()) {
                let key = ObjectCache::generate_key();
                if let Err(e) = self.cache.set(&key, photo.as_bytes()) {
                    self.discard_images(&new_keys);
                    return Err(e);
                }
                car.set_image_ref(key.clone());
                new_keys.push(key);
            }
            stored.push(car);
        }
        let stored = Garage::from(stored);

        if let Err(e) = self.records.save(&stored) {
            self.discard_images(&new_keys);
            return Err(e);
        }

        let kept: HashSet<&str> = stored.image_refs().collect();
        let orphans: Vec<String> = previous_refs
            .into_iter()
            .filter(|key| !kept.contains(key.as_str()))
            .collect();
        self.discard_images(&orphans);

        Ok(stored)
    }

    fn discard_images(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.cache.delete(key) {
                tracing::warn!(key = %key, error = %e, "Could not delete cached image");
            }
        }
    }

    fn spawn_remote_save(&self, full: Garage) {
        let remote = self.remote.clone();
        let gate = self.remote_gate.clone();
        let mut tasks = match self.remote_tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.spawn(async move {
            let _turn = gate.lock().await;
            match remote.save(&full).await {
                Ok(SaveOutcome::Pushed) => tracing::debug!("Garage saved to remote"),
                Ok(SaveOutcome::Queued) => tracing::info!("Garage queued for remote sync"),
                Ok(SaveOutcome::Skipped) => {}
                Err(e) => tracing::error!(error = %e, "Could not queue remote save"),
            }
        });
    }
}

fn load_or_empty(records: &RecordStore) -> Garage {
    records.load().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Could not read local garage");
        Garage::new()
    })
}

fn rehydrate(cache: &ObjectCache, garage: &Garage) -> Garage {
    garage
        .iter()
        .map(|car| rehydrate_car(cache, car.clone()))
        .collect()
}

fn rehydrate_car(cache: &ObjectCache, mut car: Car) -> Car {
    let Some(key) = car.image_ref().map(str::to_string) else {
        return car;
    };
    match cache.get(&key).and_then(Photo::from_blob) {
        Some(photo) => car.set_photo(photo),
        None => tracing::debug!(key = %key, "Cached image missing, sending reference only"),
    }
    car
}
