//! Batched, transactional writes of one league's records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::PersistError;
use crate::model::{
    CanonicalMatchup, DraftResultRecord, LeagueRecord, PlayerRecord, StandingRecord, TeamRecord,
    TransactionRecord,
};
use crate::store::{ReplaceScope, Store, WriteBatch, WriteOp};

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Largest number of records written in one upsert transaction.
    pub max_batch_size: usize,
    pub base_timeout: Duration,
    pub per_record_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            base_timeout: Duration::from_secs(10),
            per_record_timeout: Duration::from_millis(20),
            max_timeout: Duration::from_secs(120),
        }
    }
}

impl BatchPolicy {
    /// Batch size for a phase writing `total` records.
    ///
    /// Small phases go in one transaction; larger ones step up through fixed
    /// sizes and stop at `max_batch_size`.
    pub fn batch_size_for(&self, total: usize) -> usize {
        let size = match total {
            0..=50 => total.max(1),
            51..=500 => 100,
            501..=2_000 => 250,
            _ => 500,
        };
        size.min(self.max_batch_size.max(1))
    }

    pub fn timeout_for(&self, records: usize) -> Duration {
        let scaled = self
            .base_timeout
            .saturating_add(self.per_record_timeout.saturating_mul(records as u32));
        scaled.min(self.max_timeout)
    }
}

/// Everything one league sync writes.
///
/// `draft_results` and `transactions` are `None` when their endpoint could
/// not be fetched; the stored sets are then left as they are.
#[derive(Debug, Clone)]
pub struct LeagueWrite {
    pub league: LeagueRecord,
    pub teams: Vec<TeamRecord>,
    pub standings: Vec<StandingRecord>,
    pub matchups: Vec<CanonicalMatchup>,
    pub draft_results: Option<Vec<DraftResultRecord>>,
    pub transactions: Option<Vec<TransactionRecord>>,
    pub players: Vec<PlayerRecord>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub batches: usize,
    pub teams: usize,
    pub standings: usize,
    pub matchups: usize,
    pub draft_results: usize,
    pub transactions: usize,
    pub players: usize,
}

pub struct BatchPersistence {
    store: Arc<dyn Store>,
    policy: BatchPolicy,
}

impl BatchPersistence {
    pub fn new(store: Arc<dyn Store>, policy: BatchPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// Write a league in phase order: league, teams, standings, matchups,
    /// draft results, transactions, players. The sync stamp goes last.
    pub async fn persist_league(&self, write: LeagueWrite) -> Result<PersistReport, PersistError> {
        let league_key = write.league.league_key.clone();
        let season = write.league.season.clone();
        let mut report = PersistReport::default();

        self.run(
            WriteBatch::new(format!("league:{league_key}"), vec![WriteOp::UpsertLeague(write.league)]),
            &mut report,
        )
        .await?;

        report.teams = self
            .upsert_chunked(&league_key, "teams", write.teams, WriteOp::UpsertTeams, &mut report)
            .await?;
        report.standings = self
            .upsert_chunked(
                &league_key,
                "standings",
                write.standings,
                WriteOp::UpsertStandings,
                &mut report,
            )
            .await?;
        report.matchups = self
            .upsert_chunked(
                &league_key,
                "matchups",
                write.matchups,
                WriteOp::UpsertMatchups,
                &mut report,
            )
            .await?;

        if let Some(rows) = write.draft_results {
            report.draft_results = rows.len();
            let scope = ReplaceScope::DraftResults {
                league_key: league_key.clone(),
                season: season.clone(),
            };
            self.replace(
                &league_key,
                "draft_results",
                scope,
                rows,
                WriteOp::InsertDraftResults,
                &mut report,
            )
            .await?;
        }

        if let Some(rows) = write.transactions {
            report.transactions = rows.len();
            let scope = ReplaceScope::Transactions {
                league_key: league_key.clone(),
                season: season.clone(),
            };
            self.replace(
                &league_key,
                "transactions",
                scope,
                rows,
                WriteOp::InsertTransactions,
                &mut report,
            )
            .await?;
        }

        report.players = self
            .upsert_chunked(
                &league_key,
                "players",
                write.players,
                WriteOp::UpsertPlayers,
                &mut report,
            )
            .await?;

        self.run(
            WriteBatch::new(
                format!("synced:{league_key}"),
                vec![WriteOp::MarkSynced {
                    league_key: league_key.clone(),
                    at: write.synced_at,
                }],
            ),
            &mut report,
        )
        .await?;

        info!(
            league_key = %league_key,
            teams = report.teams,
            matchups = report.matchups,
            draft_results = report.draft_results,
            transactions = report.transactions,
            batches = report.batches,
            "Persisted league"
        );
        Ok(report)
    }

    async fn run(&self, batch: WriteBatch, report: &mut PersistReport) -> Result<(), PersistError> {
        let timeout = self.policy.timeout_for(batch.record_count());
        debug!(label = %batch.label, records = batch.record_count(), ?timeout, "Executing batch");
        self.store.execute(batch, timeout).await?;
        report.batches += 1;
        Ok(())
    }

    async fn upsert_chunked<T, F>(
        &self,
        league_key: &str,
        phase: &str,
        rows: Vec<T>,
        wrap: F,
        report: &mut PersistReport,
    ) -> Result<usize, PersistError>
    where
        T: Clone,
        F: Fn(Vec<T>) -> WriteOp,
    {
        let total = rows.len();
        if total == 0 {
            return Ok(0);
        }
        let size = self.policy.batch_size_for(total);
        for (i, chunk) in rows.chunks(size).enumerate() {
            let batch = WriteBatch::new(
                format!("{phase}:{league_key}:{i}"),
                vec![wrap(chunk.to_vec())],
            );
            self.run(batch, report).await?;
        }
        Ok(total)
    }

    /// Delete the scope and insert the fetched rows in one transaction.
    async fn replace<T, F>(
        &self,
        league_key: &str,
        phase: &str,
        scope: ReplaceScope,
        rows: Vec<T>,
        wrap: F,
        report: &mut PersistReport,
    ) -> Result<(), PersistError>
    where
        T: Clone,
        F: Fn(Vec<T>) -> WriteOp,
    {
        let mut ops = vec![WriteOp::DeleteScope(scope)];
        if !rows.is_empty() {
            let size = self.policy.max_batch_size.max(1);
            ops.extend(rows.chunks(size).map(|chunk| wrap(chunk.to_vec())));
        }
        self.run(WriteBatch::new(format!("{phase}:{league_key}"), ops), report)
            .await
    }
}
