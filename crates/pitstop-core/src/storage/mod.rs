//! Storage layer
//!
//! Everything Pitstop keeps on the device:
//!
//! - **Records**: the garage as one JSON document, written atomically
//! - **Write queue**: SQLite table of remote operations awaiting replay
//! - **Object cache**: SQLite key to blob store for photos, evicted oldest
//!   first when full

pub mod error;
pub mod object_cache;
pub mod queue;
pub mod records;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use object_cache::{BlobStore, CacheEntry, ObjectCache, SqliteBlobStore, PRUNE_BATCH};
pub use queue::{QueueAction, QueueEntry, QueuePayload, WriteQueue};
pub use records::RecordStore;
pub use schema::SCHEMA_VERSION;

pub(crate) use records::atomic_write;
