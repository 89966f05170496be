//! Pitstop Core Library
//!
//! Offline-first persistence and sync for a personal vehicle garage.
//!
//! # Architecture
//!
//! - **Local first**: the garage file on disk is the source of truth for
//!   reads; every write lands there before returning
//! - **Image cache**: photos live in a SQLite blob store, records keep only
//!   the cache key
//! - **Write queue**: remote writes that cannot be sent now are stored in
//!   SQLite and replayed in order with exponential backoff
//!
//! # Quick Start
//!
//! ```text
//! let ctx = AppContext::open(Config::load()?, true)?;
//! let repo = ctx.repository();
//! repo.init();
//!
//! let mut garage = repo.load().await;
//! repo.add_car(&mut garage, Car::new("Fiat", "Uno", "Escada")).await?;
//!
//! repo.shutdown().await;
//! ```
//!
//! # Modules
//!
//! - `repository`: Garage repository (main entry point)
//! - `models`: Cars, photos and the garage collection
//! - `storage`: Record file, image cache and write queue
//! - `remote`: Remote document stores (Supabase, local fallback)
//! - `sync`: Remote sync client, connectivity and retry scheduling
//! - `identity`: Persistent anonymous user id
//! - `context`: Wiring from configuration
//! - `config`: Application configuration

pub mod config;
pub mod context;
pub mod identity;
pub mod models;
pub mod remote;
pub mod repository;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::{Config, RemoteBackend};
pub use context::AppContext;
pub use identity::UserIdentity;
pub use models::{Car, CarImage, Garage, GarageError, Location, Photo};
pub use remote::{DocumentStore, RemoteError, RemoteResult};
pub use repository::{GarageRepository, RepositoryError, RepositoryResult};
pub use storage::{ObjectCache, RecordStore, StorageError, StorageResult, WriteQueue};
pub use sync::{Connectivity, RemoteSyncClient, SaveOutcome, SyncState};
