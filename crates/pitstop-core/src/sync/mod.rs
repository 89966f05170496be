//! Remote synchronization
//!
//! - `client`: the [`RemoteSyncClient`], which pushes garages to the remote
//!   store and replays the write queue with backoff
//! - `connectivity`: online/offline signal
//! - `scheduler`: delayed tasks behind a trait so retries are testable

mod client;
mod connectivity;
mod scheduler;

pub use client::{
    Connector, DrainOutcome, RemoteSyncClient, SaveOutcome, SkipReason, SnapshotProvider,
    SyncCommand, SyncSettings, SyncState,
};
pub use connectivity::Connectivity;
pub use scheduler::{backoff_delay, ScheduledTask, Scheduler, TaskHandle, TokioScheduler};
