//! Application wiring
//!
//! Opens every store named by a [`Config`] once and hands out the pieces.
//! Nothing here is global; tests build their own contexts over temp dirs.

use std::sync::Arc;

use crate::config::Config;
use crate::identity::UserIdentity;
use crate::repository::GarageRepository;
use crate::storage::{ObjectCache, RecordStore, StorageError, StorageResult, WriteQueue};
use crate::sync::{Connectivity, RemoteSyncClient, Scheduler, TokioScheduler};

pub struct AppContext {
    config: Config,
    queue: Arc<WriteQueue>,
    identity: Arc<UserIdentity>,
    cache: Arc<ObjectCache>,
    records: RecordStore,
    connectivity: Connectivity,
    sync_client: RemoteSyncClient,
}

impl AppContext {
    /// Open the local stores under `config.data_dir`
    pub fn open(config: Config, online: bool) -> StorageResult<Self> {
        Self::open_with(config, Connectivity::new(online), Arc::new(TokioScheduler))
    }

    pub fn open_with(
        config: Config,
        connectivity: Connectivity,
        scheduler: Arc<dyn Scheduler>,
    ) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| StorageError::CreateDirectory {
            path: config.data_dir.clone(),
            source: e,
        })?;

        let queue = Arc::new(WriteQueue::open(&config.queue_path())?);
        let identity = Arc::new(UserIdentity::new(config.user_id_path()));
        let cache = Arc::new(ObjectCache::open(
            &config.image_cache_path(),
            config.image_cache_quota_bytes,
        ));
        let records = RecordStore::new(config.garage_path(), config.record_quota_bytes);
        // One client per queue: its drain flag is what keeps replays exclusive
        let sync_client = RemoteSyncClient::from_config(
            &config,
            queue.clone(),
            identity.clone(),
            connectivity.clone(),
            scheduler,
        );

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            image_cache = cache.is_enabled(),
            "Opened local stores"
        );

        Ok(Self {
            config,
            queue,
            identity,
            cache,
            records,
            connectivity,
            sync_client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    pub fn identity(&self) -> &Arc<UserIdentity> {
        &self.identity
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// The sync client over this context's queue and identity
    pub fn sync_client(&self) -> &RemoteSyncClient {
        &self.sync_client
    }

    /// A repository sharing this context's sync client
    ///
    /// Call [`GarageRepository::init`] before use to connect the remote.
    pub fn repository(&self) -> GarageRepository {
        GarageRepository::new(
            self.records.clone(),
            self.cache.clone(),
            self.sync_client.clone(),
        )
    }
}
