//! Remote document store contract
//!
//! The sync client only needs keyed upsert, get and delete of one garage
//! document per user. Each backend implements [`DocumentStore`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, RemoteBackend};
use crate::models::Garage;
use crate::storage::StorageError;

use super::fallback::LocalFallbackStore;
use super::supabase::SupabaseStore;

/// Errors from a remote document store
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Remote sync is disabled or credentials are missing
    #[error("Remote store not configured: {0}")]
    NotConfigured(String),

    /// Credentials or URL are present but unusable
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an error status
    #[error("Remote store error: {message} ({status})")]
    Api { status: u16, message: String },

    #[error("Local fallback store: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot be reached right now
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A keyed document store holding one garage per user id
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the garage stored under `id`
    async fn upsert(&self, id: &str, data: &Garage) -> RemoteResult<()>;

    /// Fetch the garage stored under `id`, `None` when there is none
    async fn get_by_id(&self, id: &str) -> RemoteResult<Option<Garage>>;

    /// Delete the garage stored under `id`; missing ids are not an error
    async fn delete_by_id(&self, id: &str) -> RemoteResult<()>;

    /// Short name for logs and status output
    fn name(&self) -> &'static str;
}

/// Build the document store selected by `config`
pub fn connect(config: &Config) -> RemoteResult<Arc<dyn DocumentStore>> {
    match config.remote_backend {
        RemoteBackend::None => Err(RemoteError::NotConfigured(
            "remote sync is disabled".to_string(),
        )),
        RemoteBackend::Supabase => {
            if !config.has_remote_credentials() {
                return Err(RemoteError::NotConfigured(
                    "set remote_url and remote_key (or PITSTOP_REMOTE_URL / PITSTOP_REMOTE_KEY)"
                        .to_string(),
                ));
            }
            let url = config.remote_url.as_deref().unwrap_or_default();
            let key = config.remote_key.as_deref().unwrap_or_default();
            let store = SupabaseStore::new(url, key, &config.remote_table)?;
            Ok(Arc::new(store))
        }
        RemoteBackend::Local => Ok(Arc::new(LocalFallbackStore::new(
            config.fallback_store_path(),
            config.fallback_quota_bytes,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_connect_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::local_only(temp_dir.path());
        assert!(matches!(connect(&config), Err(RemoteError::NotConfigured(_))));
    }

    #[test]
    fn test_connect_supabase_requires_credentials() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::local_only(temp_dir.path());
        config.remote_backend = RemoteBackend::Supabase;
        config.remote_url = Some("https://YOUR_PROJECT.supabase.co".to_string());
        config.remote_key = Some("YOUR_ANON_KEY".to_string());
        assert!(matches!(connect(&config), Err(RemoteError::NotConfigured(_))));

        config.remote_url = Some("https://abc.supabase.co".to_string());
        config.remote_key = Some("anon".to_string());
        assert_eq!(connect(&config).unwrap().name(), "supabase");
    }

    #[test]
    fn test_connect_local() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::local_only(temp_dir.path());
        config.remote_backend = RemoteBackend::Local;
        assert_eq!(connect(&config).unwrap().name(), "local");
    }
}
