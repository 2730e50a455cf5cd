//! Sync orchestration.
//!
//! Per league: `Pending → Skipped`, `Pending → Fetching → Reconciling →
//! Persisted`, or `Pending → Fetching → Failed`. Leagues run in fixed-size
//! concurrent batches; a failed or skipped league becomes an entry in the
//! summary's `errors`, and a failure never reaches its siblings.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::client::{Endpoint, LeagueSource};
use crate::discovery::filter_seasons;
use crate::error::LeagueError;
use crate::model::{LeagueRecord, LeagueSyncState};
use crate::parse;
use crate::persist::{BatchPersistence, LeagueWrite};
use crate::reader::AnalyticsReader;
use crate::reconcile::MatchupReconciler;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Age after which an unfinished league is fetched again.
    pub freshness_window: Duration,
    pub league_concurrency: usize,
    /// Pause between league batches.
    pub batch_delay: Duration,
    pub force_refresh: bool,
    /// Seasons synced in `SyncMode::All`; empty means every season.
    pub seasons: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(6 * 3600),
            league_concurrency: 3,
            batch_delay: Duration::from_secs(1),
            force_refresh: false,
            seasons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Every league reachable from the anchor, filtered to the target seasons.
    #[default]
    All,
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Restricts `SyncMode::All` to one season.
    pub season: Option<String>,
    pub seasons: Option<Vec<String>>,
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub leagues_processed: usize,
    pub leagues_skipped: usize,
    pub teams_processed: usize,
    pub matchups_processed: usize,
    /// One entry per failed or skipped league, plus discovery failures.
    pub errors: Vec<String>,
    /// Entries in `errors` that are failures rather than skips.
    pub failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncSummary {
    fn started(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            leagues_processed: 0,
            leagues_skipped: 0,
            teams_processed: 0,
            matchups_processed: 0,
            errors: Vec::new(),
            failures: 0,
            started_at: now,
            finished_at: now,
        }
    }

    fn record(&mut self, league_key: &str, outcome: LeagueOutcome) {
        match outcome {
            LeagueOutcome::Persisted { teams, matchups } => {
                self.leagues_processed += 1;
                self.teams_processed += teams;
                self.matchups_processed += matchups;
            }
            LeagueOutcome::Skipped(reason) => {
                debug!(league_key, ?reason, "League skipped");
                self.leagues_skipped += 1;
                self.errors.push(format!("{league_key}: skipped ({reason})"));
            }
            LeagueOutcome::Failed(message) => self.fail(message),
        }
    }

    fn fail(&mut self, message: String) {
        self.failures += 1;
        self.errors.push(message);
    }

    /// No league or discovery failure; skips do not count.
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FinishedAndComplete,
    Fresh,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::FinishedAndComplete => write!(f, "finished"),
            SkipReason::Fresh => write!(f, "fresh"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Sync,
    Skip(SkipReason),
}

/// Whether a league needs fetching this run.
///
/// A finished league whose teams and matchups are stored is never fetched
/// again, even when forced. Anything else is fetched when forced, when it has
/// never been stamped, or when its stamp is older than `window`.
pub fn decide(
    state: Option<&LeagueSyncState>,
    now: DateTime<Utc>,
    window: Duration,
    force: bool,
) -> SyncDecision {
    let Some(state) = state else {
        return SyncDecision::Sync;
    };
    if state.is_finished && state.is_complete() {
        return SyncDecision::Skip(SkipReason::FinishedAndComplete);
    }
    if force {
        return SyncDecision::Sync;
    }
    match state.last_synced_at {
        // A stamp from the future counts as fresh.
        Some(at) if (now - at).to_std().map(|age| age < window).unwrap_or(true) => {
            SyncDecision::Skip(SkipReason::Fresh)
        }
        _ => SyncDecision::Sync,
    }
}

#[derive(Debug)]
enum LeagueOutcome {
    Persisted { teams: usize, matchups: usize },
    Skipped(SkipReason),
    Failed(String),
}

pub struct SyncOrchestrator {
    source: Arc<dyn LeagueSource>,
    store: Arc<dyn Store>,
    persistence: BatchPersistence,
    settings: SyncSettings,
    reader: Option<Arc<AnalyticsReader>>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn LeagueSource>,
        store: Arc<dyn Store>,
        persistence: BatchPersistence,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            store,
            persistence,
            settings,
            reader: None,
        }
    }

    /// Invalidate `reader` after every run that persisted something.
    pub fn with_reader(mut self, reader: Arc<AnalyticsReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one sync. Always returns a summary; partial failure is reported in
    /// `errors`.
    pub async fn sync(&self, options: SyncOptions) -> SyncSummary {
        let run_id = Uuid::new_v4();
        let mut summary = SyncSummary::started(run_id);
        let force = options.force_refresh.unwrap_or(self.settings.force_refresh);

        let league_keys = match self.targets(&options).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(%run_id, error = %e, "League discovery failed");
                summary.fail(format!("discovery: {e}"));
                summary.finished_at = Utc::now();
                return summary;
            }
        };

        info!(
            %run_id,
            leagues = league_keys.len(),
            force,
            concurrency = self.settings.league_concurrency,
            "Starting sync"
        );

        let batch_size = self.settings.league_concurrency.max(1);
        let batches: Vec<&[String]> = league_keys.chunks(batch_size).collect();
        for (i, batch) in batches.iter().enumerate() {
            if i > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }

            let outcomes = futures::future::join_all(
                batch.iter().map(|key| self.process_league(run_id, key, force)),
            )
            .await;

            for (key, outcome) in batch.iter().zip(outcomes) {
                summary.record(key, outcome);
            }
        }

        if summary.leagues_processed > 0 {
            if let Some(reader) = &self.reader {
                reader.invalidate();
            }
        }

        summary.finished_at = Utc::now();
        info!(
            %run_id,
            processed = summary.leagues_processed,
            skipped = summary.leagues_skipped,
            teams = summary.teams_processed,
            matchups = summary.matchups_processed,
            failures = summary.failures,
            "Sync finished"
        );
        summary
    }

    async fn targets(&self, options: &SyncOptions) -> Result<Vec<String>, LeagueError> {
        match &options.mode {
            SyncMode::Single(key) => Ok(vec![key.clone()]),
            SyncMode::List(keys) => {
                let mut seen = BTreeSet::new();
                Ok(keys
                    .iter()
                    .filter(|k| seen.insert(k.as_str()))
                    .cloned()
                    .collect())
            }
            SyncMode::All => {
                let seasons = match (&options.seasons, &options.season) {
                    (Some(seasons), _) => seasons.clone(),
                    (None, Some(season)) => vec![season.clone()],
                    (None, None) => self.settings.seasons.clone(),
                };
                let discovered = self.source.discover_league_keys().await?;
                Ok(filter_seasons(discovered, &seasons)
                    .into_iter()
                    .map(|identity| identity.league_key)
                    .collect())
            }
        }
    }

    #[instrument(skip(self, run_id, force), fields(run_id = %run_id))]
    async fn process_league(&self, run_id: Uuid, league_key: &str, force: bool) -> LeagueOutcome {
        match self.try_process_league(league_key, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(league_key, error = %e, "League sync failed");
                LeagueOutcome::Failed(format!("{league_key}: {e}"))
            }
        }
    }

    async fn try_process_league(
        &self,
        league_key: &str,
        force: bool,
    ) -> Result<LeagueOutcome, LeagueError> {
        let state = self.store.league_sync_state(league_key).await?;
        if let SyncDecision::Skip(reason) = decide(
            state.as_ref(),
            Utc::now(),
            self.settings.freshness_window,
            force,
        ) {
            return Ok(LeagueOutcome::Skipped(reason));
        }

        // Fetching
        let (bundle, history) = tokio::join!(
            self.source.fetch_league_bundle(league_key),
            self.source.fetch_matchup_history(league_key)
        );
        let failed = bundle.failed_endpoints();
        if !failed.is_empty() {
            warn!(league_key, endpoints = ?failed, "Continuing without failed endpoints");
        }

        let meta = bundle
            .get(Endpoint::Metadata)
            .and_then(parse::league_meta)
            .ok_or_else(|| LeagueError::MissingData("league metadata unavailable".to_string()))?;
        let history = history?;
        let season = meta.season.clone();

        // Reconciling
        let settings = bundle
            .get(Endpoint::Settings)
            .map(parse::league_settings)
            .unwrap_or_default();
        let (teams, standings) = bundle
            .get(Endpoint::Standings)
            .map(|doc| parse::standings(doc, league_key, &season))
            .unwrap_or_default();

        let mut fragments = parse::history_fragments(&history);
        // Scoreboard last: its view of the current week replaces the history's.
        if let Some(doc) = bundle.get(Endpoint::Scoreboard) {
            fragments.extend(parse::scoreboard_fragments(doc));
        }
        let matchups = MatchupReconciler::new(league_key, &season).reconcile(fragments);

        let draft_results = bundle
            .get(Endpoint::DraftResults)
            .map(|doc| parse::draft_results(doc, league_key, &season));
        let transactions = bundle
            .get(Endpoint::Transactions)
            .map(|doc| parse::transactions(doc, league_key, &season));

        let player_keys: Vec<String> = draft_results
            .iter()
            .flatten()
            .filter_map(|pick| pick.player_key.clone())
            .chain(transactions.iter().flatten().flat_map(|tx| tx.player_keys()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let players = if player_keys.is_empty() {
            Vec::new()
        } else {
            self.source.fetch_players(&player_keys).await
        };

        let league = LeagueRecord {
            league_key: meta.league_key,
            season: meta.season,
            game_code: meta.game_code,
            name: meta.name,
            num_teams: meta.num_teams,
            current_week: meta.current_week,
            start_week: meta.start_week,
            end_week: meta.end_week,
            playoff_start_week: settings.playoff_start_week,
            is_finished: meta.is_finished,
            stat_categories: settings.stat_categories,
        };

        let report = self
            .persistence
            .persist_league(LeagueWrite {
                league,
                teams,
                standings,
                matchups,
                draft_results,
                transactions,
                players,
                synced_at: Utc::now(),
            })
            .await?;

        Ok(LeagueOutcome::Persisted {
            teams: report.teams,
            matchups: report.matchups,
        })
    }
}
