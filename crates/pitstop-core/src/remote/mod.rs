//! Remote document stores
//!
//! - `store`: the [`DocumentStore`] contract and backend selection
//! - `supabase`: hosted PostgREST table
//! - `fallback`: JSON file on this device standing in for the cloud

pub mod fallback;
pub mod store;
pub mod supabase;

pub use fallback::LocalFallbackStore;
pub use store::{connect, DocumentStore, RemoteError, RemoteResult};
pub use supabase::SupabaseStore;
