//! Endpoint parsers: documents in, typed records out.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::document::Document;
use crate::model::{
    DiscoveredLeague, DraftResultRecord, LeagueIdentity, LeagueMeta, PlayerRecord, StandingRecord,
    TeamFragment, TeamRecord, TransactionRecord,
};

/// Settings the ingestion core keeps from the settings endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeagueSettings {
    pub playoff_start_week: Option<i32>,
    pub stat_categories: Value,
}

fn league(doc: &Document) -> Option<Document> {
    doc.content().field("league")
}

fn as_i32(value: Option<i64>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

/// Game id prefix of a league key (`"423.l.77"` → `"423"`).
pub fn game_code_of(league_key: &str) -> String {
    league_key
        .split(".l.")
        .next()
        .unwrap_or(league_key)
        .to_string()
}

/// Renewal links arrive as `"414_12345"`; league keys are `"414.l.12345"`.
pub fn normalize_renewal_key(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains(".l.") {
        return Some(raw.to_string());
    }
    match raw.split_once('_') {
        Some((game, league)) if !game.is_empty() && !league.is_empty() => {
            Some(format!("{game}.l.{league}"))
        }
        _ => None,
    }
}

pub fn league_meta(doc: &Document) -> Option<LeagueMeta> {
    let league = league(doc)?;
    let league_key = league.str("league_key")?;
    let season = league.str("season")?;
    Some(LeagueMeta {
        game_code: game_code_of(&league_key),
        name: league.str("name").unwrap_or_default(),
        season,
        num_teams: as_i32(league.i64("num_teams")).unwrap_or(0),
        current_week: as_i32(league.i64("current_week")),
        start_week: as_i32(league.i64("start_week")),
        end_week: as_i32(league.i64("end_week")),
        is_finished: league.flag("is_finished"),
        league_key,
    })
}

pub fn league_settings(doc: &Document) -> LeagueSettings {
    let Some(settings) = league(doc).and_then(|l| l.field("settings")) else {
        return LeagueSettings::default();
    };

    let categories: Vec<Value> = settings
        .field("stat_categories")
        .map(|c| c.items("stats"))
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.field("stat"))
        .filter_map(|stat| {
            let stat_id = stat.str("stat_id")?;
            Some(json!({
                "stat_id": stat_id,
                "name": stat.str("name"),
                "display_name": stat.str("display_name"),
            }))
        })
        .collect();

    LeagueSettings {
        playoff_start_week: as_i32(settings.i64("playoff_start_week")),
        stat_categories: Value::Array(categories),
    }
}

pub fn standings(
    doc: &Document,
    league_key: &str,
    season: &str,
) -> (Vec<TeamRecord>, Vec<StandingRecord>) {
    let teams = league(doc)
        .and_then(|l| l.field("standings"))
        .map(|s| s.items("teams"))
        .unwrap_or_default();

    let mut records = Vec::new();
    let mut standings = Vec::new();

    for item in teams {
        let Some(team) = item.field("team") else {
            continue;
        };
        let Some(team_key) = team.str("team_key") else {
            warn!(league_key, "Standings entry without a team key");
            continue;
        };

        records.push(TeamRecord {
            team_key: team_key.clone(),
            league_key: league_key.to_string(),
            season: season.to_string(),
            name: team.str("name").unwrap_or_default(),
            manager_name: team
                .items("managers")
                .first()
                .and_then(|m| m.field("manager"))
                .and_then(|m| m.str("nickname")),
            logo_url: team
                .items("team_logos")
                .first()
                .and_then(|l| l.field("team_logo"))
                .and_then(|l| l.str("url")),
        });

        if let Some(table) = team.field("team_standings") {
            let totals = table.field("outcome_totals");
            let total = |key: &str| -> i32 {
                as_i32(totals.as_ref().and_then(|t| t.i64(key))).unwrap_or(0)
            };
            standings.push(StandingRecord {
                team_key,
                league_key: league_key.to_string(),
                season: season.to_string(),
                rank: as_i32(table.i64("rank")),
                playoff_seed: as_i32(table.i64("playoff_seed")),
                wins: total("wins"),
                losses: total("losses"),
                ties: total("ties"),
                points_for: table.f64("points_for").unwrap_or(0.0),
                points_against: table.f64("points_against").unwrap_or(0.0),
            });
        }
    }

    (records, standings)
}

fn stat_blob(team: &Document) -> Value {
    let mut stats = Map::new();
    if let Some(team_stats) = team.field("team_stats") {
        for item in team_stats.items("stats") {
            let Some(stat) = item.field("stat") else {
                continue;
            };
            if let Some(stat_id) = stat.str("stat_id") {
                let value = stat.field("value").map(|v| v.into_value()).unwrap_or(Value::Null);
                stats.insert(stat_id, value);
            }
        }
    }
    Value::Object(stats)
}

/// Both teams' fragments for one matchup entry.
fn fragments_for_matchup(matchup: &Document) -> Vec<TeamFragment> {
    let Some(week) = as_i32(matchup.i64("week")) else {
        return Vec::new();
    };

    let sides: Vec<(String, Document)> = matchup
        .items("teams")
        .iter()
        .filter_map(|item| item.field("team"))
        .filter_map(|team| team.str("team_key").map(|key| (key, team)))
        .collect();

    if sides.len() != 2 {
        return Vec::new();
    }

    let week_start = parse_date(matchup.str("week_start"));
    let week_end = parse_date(matchup.str("week_end"));
    let winner_key = matchup.str("winner_team_key");

    sides
        .iter()
        .enumerate()
        .map(|(i, (team_key, team))| TeamFragment {
            team_key: team_key.clone(),
            week,
            week_start,
            week_end,
            points: team
                .field("team_points")
                .and_then(|p| p.f64("total"))
                .unwrap_or(0.0),
            stats: stat_blob(team),
            opponent_key: sides[1 - i].0.clone(),
            is_playoffs: matchup.flag("is_playoffs"),
            is_consolation: matchup.flag("is_consolation"),
            is_tied: matchup.flag("is_tied"),
            winner_key: winner_key.clone(),
        })
        .collect()
}

/// Each team's own fragments from the full matchup-history document.
pub fn history_fragments(doc: &Document) -> Vec<TeamFragment> {
    let mut fragments = Vec::new();
    let teams = league(doc).map(|l| l.items("teams")).unwrap_or_default();

    for item in teams {
        let Some(team) = item.field("team") else {
            continue;
        };
        let Some(own_key) = team.str("team_key") else {
            continue;
        };
        for entry in team.items("matchups") {
            let Some(matchup) = entry.field("matchup") else {
                continue;
            };
            fragments.extend(
                fragments_for_matchup(&matchup)
                    .into_iter()
                    .filter(|f| f.team_key == own_key),
            );
        }
    }

    fragments
}

/// Fragments for the current week from the scoreboard.
pub fn scoreboard_fragments(doc: &Document) -> Vec<TeamFragment> {
    league(doc)
        .and_then(|l| l.field("scoreboard"))
        .map(|s| s.items("matchups"))
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry.field("matchup"))
        .flat_map(|m| fragments_for_matchup(&m))
        .collect()
}

pub fn draft_results(doc: &Document, league_key: &str, season: &str) -> Vec<DraftResultRecord> {
    league(doc)
        .map(|l| l.items("draft_results"))
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item.field("draft_result"))
        .filter_map(|pick| {
            Some(DraftResultRecord {
                league_key: league_key.to_string(),
                season: season.to_string(),
                pick: as_i32(pick.i64("pick"))?,
                round: as_i32(pick.i64("round")).unwrap_or(0),
                team_key: pick.str("team_key")?,
                player_key: pick.str("player_key"),
                cost: as_i32(pick.i64("cost")),
            })
        })
        .collect()
}

fn player_move(player: &Document) -> Option<Value> {
    let player_key = player.str("player_key")?;
    let data = player
        .field("transaction_data")
        .and_then(|d| d.as_list().into_iter().next());
    let data_str = |key: &str| data.as_ref().and_then(|d| d.str(key));
    Some(json!({
        "player_key": player_key,
        "name": player.field("name").and_then(|n| n.str("full")),
        "type": data_str("type"),
        "source_team_key": data_str("source_team_key"),
        "destination_team_key": data_str("destination_team_key"),
    }))
}

pub fn transactions(doc: &Document, league_key: &str, season: &str) -> Vec<TransactionRecord> {
    league(doc)
        .map(|l| l.items("transactions"))
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item.field("transaction"))
        .filter_map(|tx| {
            let moves: Vec<Value> = tx
                .items("players")
                .iter()
                .filter_map(|p| p.field("player"))
                .filter_map(|p| player_move(&p))
                .collect();
            Some(TransactionRecord {
                transaction_key: tx.str("transaction_key")?,
                league_key: league_key.to_string(),
                season: season.to_string(),
                kind: tx.str("type").unwrap_or_default(),
                status: tx.str("status").unwrap_or_default(),
                occurred_at: tx
                    .i64("timestamp")
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
                players: Value::Array(moves),
            })
        })
        .collect()
}

pub fn players(doc: &Document) -> Vec<PlayerRecord> {
    doc.content()
        .items("players")
        .iter()
        .filter_map(|item| item.field("player"))
        .filter_map(|player| {
            Some(PlayerRecord {
                player_key: player.str("player_key")?,
                full_name: player
                    .field("name")
                    .and_then(|n| n.str("full"))
                    .unwrap_or_default(),
                team_abbr: player.str("editorial_team_abbr"),
                display_position: player.str("display_position"),
            })
        })
        .collect()
}

/// Every league visible to the logged-in user, across all games.
pub fn discovered_leagues(doc: &Document) -> Vec<DiscoveredLeague> {
    let mut out = Vec::new();
    for user in doc
        .content()
        .items("users")
        .iter()
        .filter_map(|u| u.field("user"))
    {
        for game in user.items("games").iter().filter_map(|g| g.field("game")) {
            let game_code = game.str("game_key").unwrap_or_default();
            let game_abbreviation = game.str("code").unwrap_or_default();
            for league in game.items("leagues").iter().filter_map(|l| l.field("league")) {
                let (Some(league_key), Some(season)) = (league.str("league_key"), league.str("season"))
                else {
                    continue;
                };
                out.push(DiscoveredLeague {
                    identity: LeagueIdentity {
                        league_key,
                        season,
                        game_code: game_code.clone(),
                        game_abbreviation: game_abbreviation.clone(),
                    },
                    name: league.str("name").unwrap_or_default(),
                    renew: league.str("renew").and_then(|r| normalize_renewal_key(&r)),
                    renewed: league.str("renewed").and_then(|r| normalize_renewal_key(&r)),
                });
            }
        }
    }
    out
}
