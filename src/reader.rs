//! Cache-fronted reads for the analytics layer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheStats, CoalescingCache};
use crate::model::{CanonicalMatchup, TeamRecord};
use crate::store::Store;

const TEAMS_KEY: &str = "teams:all";
const MATCHUPS_KEY: &str = "matchups:all";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReaderStats {
    pub teams: CacheStats,
    pub matchups: CacheStats,
}

/// Reads never fail: a store error yields the last good value, or an empty
/// collection when nothing has been read yet.
pub struct AnalyticsReader {
    store: Arc<dyn Store>,
    teams: CoalescingCache<Arc<Vec<TeamRecord>>>,
    matchups: CoalescingCache<Arc<Vec<CanonicalMatchup>>>,
    ttl: Duration,
}

impl AnalyticsReader {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            teams: CoalescingCache::new(),
            matchups: CoalescingCache::new(),
            ttl,
        }
    }

    pub async fn get_all_teams(&self) -> Arc<Vec<TeamRecord>> {
        let store = Arc::clone(&self.store);
        let result = self
            .teams
            .get_or_fetch(TEAMS_KEY, self.ttl, move || async move {
                store.all_teams().await.map(Arc::new)
            })
            .await;

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Team read failed with nothing cached");
            Arc::new(Vec::new())
        })
    }

    pub async fn get_all_matchups(&self) -> Arc<Vec<CanonicalMatchup>> {
        let store = Arc::clone(&self.store);
        let result = self
            .matchups
            .get_or_fetch(MATCHUPS_KEY, self.ttl, move || async move {
                store.all_matchups().await.map(Arc::new)
            })
            .await;

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Matchup read failed with nothing cached");
            Arc::new(Vec::new())
        })
    }

    /// Force the next read of each collection to go to the store. The
    /// current values remain as the fallback if that read fails.
    pub fn invalidate(&self) {
        self.teams.expire(TEAMS_KEY);
        self.matchups.expire(MATCHUPS_KEY);
    }

    /// Memory hygiene for the periodic sweep; expiry itself is lazy.
    pub fn purge_expired(&self, retain_stale_for: Duration) -> usize {
        self.teams.purge_expired(retain_stale_for) + self.matchups.purge_expired(retain_stale_for)
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            teams: self.teams.stats(),
            matchups: self.matchups.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistError;
    use crate::store::{MemoryStore, WriteBatch};
    use crate::test_support::records;
    use crate::model::LeagueSyncState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Memory store whose reads can be switched to failing.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
        reads: AtomicUsize,
    }

    impl FlakyStore {
        fn read_error() -> PersistError {
            PersistError::Rejected {
                label: "read".to_string(),
                message: "connection reset".to_string(),
            }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn execute(&self, batch: WriteBatch, timeout: Duration) -> Result<(), PersistError> {
            self.inner.execute(batch, timeout).await
        }

        async fn league_sync_state(
            &self,
            league_key: &str,
        ) -> Result<Option<LeagueSyncState>, PersistError> {
            self.inner.league_sync_state(league_key).await
        }

        async fn all_teams(&self) -> Result<Vec<TeamRecord>, PersistError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Self::read_error());
            }
            self.inner.all_teams().await
        }

        async fn all_matchups(&self) -> Result<Vec<CanonicalMatchup>, PersistError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Self::read_error());
            }
            self.inner.all_matchups().await
        }
    }

    async fn seeded_store() -> Arc<FlakyStore> {
        let store = Arc::new(FlakyStore::default());
        let teams = records::teams("423.l.1", "2023", 4);
        store
            .execute(
                WriteBatch::new(
                    "seed",
                    vec![
                        crate::store::WriteOp::UpsertLeague(records::league("423.l.1", "2023")),
                        crate::store::WriteOp::UpsertTeams(teams),
                        crate::store::WriteOp::UpsertMatchups(records::matchups("423.l.1", "2023", 6)),
                    ],
                ),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn reads_are_served_from_cache_within_ttl() {
        let store = seeded_store().await;
        let reader = AnalyticsReader::new(store.clone(), Duration::from_secs(60));

        assert_eq!(reader.get_all_teams().await.len(), 4);
        assert_eq!(reader.get_all_teams().await.len(), 4);
        assert_eq!(reader.get_all_matchups().await.len(), 6);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(reader.stats().teams.hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_serves_last_good_data() {
        let store = seeded_store().await;
        let reader = AnalyticsReader::new(store.clone(), Duration::from_secs(60));
        assert_eq!(reader.get_all_teams().await.len(), 4);

        store.failing.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(120)).await;

        assert_eq!(reader.get_all_teams().await.len(), 4);
        assert_eq!(reader.stats().teams.stale_served, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_with_nothing_cached_is_empty() {
        let store = seeded_store().await;
        store.failing.store(true, Ordering::SeqCst);
        let reader = AnalyticsReader::new(store, Duration::from_secs(60));

        assert!(reader.get_all_matchups().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_a_store_read() {
        let store = seeded_store().await;
        let reader = AnalyticsReader::new(store.clone(), Duration::from_secs(60));
        reader.get_all_teams().await;
        reader.invalidate();
        reader.get_all_teams().await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_data_backs_a_failed_read() {
        let store = seeded_store().await;
        let reader = AnalyticsReader::new(store.clone(), Duration::from_secs(60));
        assert_eq!(reader.get_all_teams().await.len(), 4);

        reader.invalidate();
        store.failing.store(true, Ordering::SeqCst);

        assert_eq!(reader.get_all_teams().await.len(), 4);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(reader.stats().teams.stale_served, 1);
    }
}
