//! Fantasy league ingestion and caching core.
//!
//! Fetches league data from the provider API, reconciles per-team matchup
//! views into two-sided records, persists them in batches and serves the
//! results to readers through a coalescing cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod connect;
pub mod discovery;
pub mod document;
pub mod error;
pub mod events;
pub mod health;
pub mod model;
pub mod parse;
pub mod persist;
pub mod reader;
pub mod reconcile;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use cache::CoalescingCache;
pub use client::{ApiClient, LeagueSource};
pub use error::{ApiError, CacheError, LeagueError, PersistError};
pub use persist::BatchPersistence;
pub use reader::AnalyticsReader;
pub use reconcile::MatchupReconciler;
pub use sync::{SyncOptions, SyncOrchestrator, SyncSummary};
