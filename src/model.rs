//! Normalized records produced by the ingestion pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One season-instance of a league, the unit of sync work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeagueIdentity {
    pub league_key: String,
    pub season: String,
    /// Provider game id, the prefix of every league key (`"423"`).
    pub game_code: String,
    /// Sport abbreviation (`"nfl"`).
    pub game_abbreviation: String,
}

/// A league as seen during discovery, with its renewal links.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLeague {
    pub identity: LeagueIdentity,
    pub name: String,
    /// Previous season's league key.
    pub renew: Option<String>,
    /// Next season's league key.
    pub renewed: Option<String>,
}

/// League metadata as returned by the metadata and settings endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct LeagueMeta {
    pub league_key: String,
    pub name: String,
    pub season: String,
    pub game_code: String,
    pub num_teams: i32,
    pub current_week: Option<i32>,
    pub start_week: Option<i32>,
    pub end_week: Option<i32>,
    pub is_finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueRecord {
    pub league_key: String,
    pub season: String,
    pub game_code: String,
    pub name: String,
    pub num_teams: i32,
    pub current_week: Option<i32>,
    pub start_week: Option<i32>,
    pub end_week: Option<i32>,
    pub playoff_start_week: Option<i32>,
    pub is_finished: bool,
    pub stat_categories: serde_json::Value,
}

/// Staleness inputs derived from the stored league and its children.
#[derive(Debug, Clone, PartialEq)]
pub struct LeagueSyncState {
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_finished: bool,
    pub has_teams: bool,
    pub has_matchups: bool,
}

impl LeagueSyncState {
    pub fn is_complete(&self) -> bool {
        self.has_teams && self.has_matchups
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamRecord {
    pub team_key: String,
    pub league_key: String,
    pub season: String,
    pub name: String,
    pub manager_name: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingRecord {
    pub team_key: String,
    pub league_key: String,
    pub season: String,
    pub rank: Option<i32>,
    pub playoff_seed: Option<i32>,
    pub wins: i32,
    pub losses: i32,
    pub ties: i32,
    pub points_for: f64,
    pub points_against: f64,
}

/// One team's own view of a single week's matchup.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamFragment {
    pub team_key: String,
    pub week: i32,
    pub week_start: Option<NaiveDate>,
    pub week_end: Option<NaiveDate>,
    pub points: f64,
    pub stats: serde_json::Value,
    pub opponent_key: String,
    pub is_playoffs: bool,
    pub is_consolation: bool,
    pub is_tied: bool,
    pub winner_key: Option<String>,
}

/// Two-sided matchup merged from both teams' fragments.
///
/// `team1_key` always holds the team with the lower numeric id, so the
/// record is identical whichever side was reconciled first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CanonicalMatchup {
    pub id: String,
    pub league_key: String,
    pub season: String,
    pub week: i32,
    pub week_start: Option<NaiveDate>,
    pub week_end: Option<NaiveDate>,
    pub team1_key: String,
    pub team2_key: String,
    pub team1_points: f64,
    pub team2_points: f64,
    pub team1_stats: serde_json::Value,
    pub team2_stats: serde_json::Value,
    pub winner_key: Option<String>,
    pub is_playoffs: bool,
    pub is_consolation: bool,
    pub is_tied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftResultRecord {
    pub league_key: String,
    pub season: String,
    pub pick: i32,
    pub round: i32,
    pub team_key: String,
    pub player_key: Option<String>,
    pub cost: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_key: String,
    pub league_key: String,
    pub season: String,
    pub kind: String,
    pub status: String,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Moves as `[{player_key, name, type, source, destination}]`.
    pub players: serde_json::Value,
}

impl TransactionRecord {
    pub fn player_keys(&self) -> Vec<String> {
        self.players
            .as_array()
            .map(|moves| {
                moves
                    .iter()
                    .filter_map(|m| m.get("player_key").and_then(|k| k.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_key: String,
    pub full_name: String,
    pub team_abbr: Option<String>,
    pub display_position: Option<String>,
}

/// Numeric suffix of a team key (`"423.l.77.t.5"` → `5`).
pub fn team_id_suffix(team_key: &str) -> Option<u32> {
    team_key.rsplit(".t.").next().and_then(|s| s.parse().ok())
}
