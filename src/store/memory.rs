//! In-process store with the same transactional semantics as Postgres.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ReplaceScope, Store, WriteBatch, WriteOp};
use crate::error::PersistError;
use crate::model::{
    CanonicalMatchup, DraftResultRecord, LeagueRecord, LeagueSyncState, PlayerRecord,
    StandingRecord, TeamRecord, TransactionRecord,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LeagueRow {
    pub record: LeagueRecord,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub leagues: BTreeMap<String, LeagueRow>,
    /// Keyed by (team_key, season).
    pub teams: BTreeMap<(String, String), TeamRecord>,
    pub standings: BTreeMap<(String, String), StandingRecord>,
    /// Keyed by (league_key, season, matchup id).
    pub matchups: BTreeMap<(String, String, String), CanonicalMatchup>,
    pub draft_results: Vec<DraftResultRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub players: BTreeMap<String, PlayerRecord>,
}

impl Tables {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::UpsertLeague(record) => {
                let last_synced_at = self
                    .leagues
                    .get(&record.league_key)
                    .and_then(|row| row.last_synced_at);
                self.leagues.insert(
                    record.league_key.clone(),
                    LeagueRow {
                        record,
                        last_synced_at,
                    },
                );
            }
            WriteOp::UpsertTeams(teams) => {
                for team in teams {
                    self.teams
                        .insert((team.team_key.clone(), team.season.clone()), team);
                }
            }
            WriteOp::UpsertStandings(rows) => {
                for row in rows {
                    self.standings
                        .insert((row.team_key.clone(), row.season.clone()), row);
                }
            }
            WriteOp::UpsertMatchups(matchups) => {
                for m in matchups {
                    self.matchups
                        .insert((m.league_key.clone(), m.season.clone(), m.id.clone()), m);
                }
            }
            WriteOp::UpsertPlayers(players) => {
                for p in players {
                    self.players.insert(p.player_key.clone(), p);
                }
            }
            WriteOp::DeleteScope(ReplaceScope::DraftResults { league_key, season }) => {
                self.draft_results
                    .retain(|r| !(r.league_key == league_key && r.season == season));
            }
            WriteOp::DeleteScope(ReplaceScope::Transactions { league_key, season }) => {
                self.transactions
                    .retain(|r| !(r.league_key == league_key && r.season == season));
            }
            WriteOp::InsertDraftResults(rows) => self.draft_results.extend(rows),
            WriteOp::InsertTransactions(rows) => self.transactions.extend(rows),
            WriteOp::MarkSynced { league_key, at } => {
                if let Some(row) = self.leagues.get_mut(&league_key) {
                    row.last_synced_at = Some(at);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    executed: AtomicUsize,
    failing_labels: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Tables {
        self.tables.lock().clone()
    }

    /// Number of batches committed.
    pub fn executed_batches(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    /// Reject every batch whose label starts with `prefix`.
    pub fn fail_batches_starting_with(&self, prefix: impl Into<String>) {
        self.failing_labels.lock().push(prefix.into());
    }

    /// Backdate a league's sync stamp.
    pub fn set_last_synced(&self, league_key: &str, at: DateTime<Utc>) {
        if let Some(row) = self.tables.lock().leagues.get_mut(league_key) {
            row.last_synced_at = Some(at);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, batch: WriteBatch, _timeout: Duration) -> Result<(), PersistError> {
        if self
            .failing_labels
            .lock()
            .iter()
            .any(|prefix| batch.label.starts_with(prefix.as_str()))
        {
            return Err(PersistError::Rejected {
                label: batch.label,
                message: "injected failure".to_string(),
            });
        }

        let mut tables = self.tables.lock();
        let mut staged = tables.clone();
        for op in batch.ops {
            staged.apply(op);
        }
        *tables = staged;
        self.executed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn league_sync_state(
        &self,
        league_key: &str,
    ) -> Result<Option<LeagueSyncState>, PersistError> {
        let tables = self.tables.lock();
        Ok(tables.leagues.get(league_key).map(|row| LeagueSyncState {
            last_synced_at: row.last_synced_at,
            is_finished: row.record.is_finished,
            has_teams: tables.teams.values().any(|t| t.league_key == league_key),
            has_matchups: tables.matchups.keys().any(|(l, _, _)| l == league_key),
        }))
    }

    async fn all_teams(&self) -> Result<Vec<TeamRecord>, PersistError> {
        Ok(self.tables.lock().teams.values().cloned().collect())
    }

    async fn all_matchups(&self) -> Result<Vec<CanonicalMatchup>, PersistError> {
        Ok(self.tables.lock().matchups.values().cloned().collect())
    }
}
