//! Record store seam.
//!
//! Writes arrive as [`WriteBatch`]es, each applied as one transaction within a
//! caller-chosen timeout.

pub mod memory;
pub mod postgres;
pub mod schema;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PersistError;
use crate::model::{
    CanonicalMatchup, DraftResultRecord, LeagueRecord, LeagueSyncState, PlayerRecord,
    StandingRecord, TeamRecord, TransactionRecord,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Season-scoped collections replaced wholesale on every sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceScope {
    DraftResults { league_key: String, season: String },
    Transactions { league_key: String, season: String },
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    UpsertLeague(LeagueRecord),
    UpsertTeams(Vec<TeamRecord>),
    UpsertStandings(Vec<StandingRecord>),
    UpsertMatchups(Vec<CanonicalMatchup>),
    UpsertPlayers(Vec<PlayerRecord>),
    DeleteScope(ReplaceScope),
    InsertDraftResults(Vec<DraftResultRecord>),
    InsertTransactions(Vec<TransactionRecord>),
    MarkSynced { league_key: String, at: DateTime<Utc> },
}

impl WriteOp {
    pub fn record_count(&self) -> usize {
        match self {
            WriteOp::UpsertLeague(_) | WriteOp::DeleteScope(_) | WriteOp::MarkSynced { .. } => 1,
            WriteOp::UpsertTeams(r) => r.len(),
            WriteOp::UpsertStandings(r) => r.len(),
            WriteOp::UpsertMatchups(r) => r.len(),
            WriteOp::UpsertPlayers(r) => r.len(),
            WriteOp::InsertDraftResults(r) => r.len(),
            WriteOp::InsertTransactions(r) => r.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub label: String,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(label: impl Into<String>, ops: Vec<WriteOp>) -> Self {
        Self {
            label: label.into(),
            ops,
        }
    }

    pub fn record_count(&self) -> usize {
        self.ops.iter().map(WriteOp::record_count).sum()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Apply every op in `batch` atomically, or none of them.
    async fn execute(&self, batch: WriteBatch, timeout: Duration) -> Result<(), PersistError>;

    async fn league_sync_state(&self, league_key: &str)
        -> Result<Option<LeagueSyncState>, PersistError>;

    async fn all_teams(&self) -> Result<Vec<TeamRecord>, PersistError>;

    async fn all_matchups(&self) -> Result<Vec<CanonicalMatchup>, PersistError>;
}
