//! Shared fixtures and fakes for unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use crate::client::auth::ClientCredentials;
use crate::client::transport::{BasicAuth, HttpResponse, HttpTransport, TransportError};
use crate::client::{ApiConfig, Endpoint, LeagueBundle, LeagueSource};
use crate::document::Document;
use crate::error::ApiError;
use crate::model::{LeagueIdentity, PlayerRecord};

pub fn api_config() -> ApiConfig {
    ApiConfig {
        base_url: "https://fantasysports.test/fantasy/v2".to_string(),
        token_url: "https://auth.test/oauth2/get_token".to_string(),
        credentials: ClientCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh-0".to_string(),
        },
        request_timeout: Duration::from_secs(5),
        matchup_history_timeout: Duration::from_secs(30),
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        requests_per_minute: None,
        player_fetch_concurrency: 2,
        anchor_league_key: Some("423.l.1".to_string()),
    }
}

/// Provider-shaped response documents.
pub mod fixtures {
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use serde_json::{json, Map, Value};

    use crate::document::Document;
    use crate::parse::game_code_of;

    fn content(value: Value) -> Document {
        Document::new(json!({ "fantasy_content": value }))
    }

    /// `{"0": .., "1": .., "count": n}`, the provider's collection shape.
    fn indexed(items: Vec<Value>) -> Value {
        let mut map = Map::new();
        let count = items.len();
        for (i, item) in items.into_iter().enumerate() {
            map.insert(i.to_string(), item);
        }
        map.insert("count".to_string(), json!(count));
        Value::Object(map)
    }

    fn meta(league_key: &str, season: &str, finished: bool) -> Value {
        json!({
            "league_key": league_key,
            "league_id": league_key.rsplit(".l.").next().unwrap_or_default(),
            "name": format!("League {league_key}"),
            "season": season,
            "num_teams": 4,
            "current_week": 3,
            "start_week": "1",
            "end_week": "16",
            "is_finished": if finished { 1 } else { 0 },
            "game_code": "nfl",
        })
    }

    fn league(league_key: &str, body: Value) -> Document {
        content(json!({ "league": [meta(league_key, "2023", false), body] }))
    }

    pub fn team_key(league_key: &str, team: usize) -> String {
        format!("{league_key}.t.{team}")
    }

    /// Round-robin pairs of 1-based team numbers for a week. Week 1 pairs
    /// team 1 with team 2.
    pub fn pairings(teams: usize, week: usize) -> Vec<(usize, usize)> {
        let mut rest: Vec<usize> = (1..teams).collect();
        rest.rotate_left(week % (teams - 1));
        let mut order = vec![0];
        order.extend(rest);
        (0..teams / 2)
            .map(|i| {
                let (a, b) = (order[i] + 1, order[teams - 1 - i] + 1);
                (a.min(b), a.max(b))
            })
            .collect()
    }

    fn points(team: usize, week: usize) -> f64 {
        100.0 + (team * 10 + week) as f64 + 0.5
    }

    fn matchup_side(league_key: &str, team: usize, week: usize) -> Value {
        json!({
            "team": [
                [
                    { "team_key": team_key(league_key, team) },
                    { "team_id": team.to_string() },
                    { "name": format!("Team {team}") }
                ],
                { "team_points": { "coverage_type": "week", "week": week.to_string(), "total": format!("{:.2}", points(team, week)) } },
                {
                    "team_stats": {
                        "coverage_type": "week",
                        "week": week.to_string(),
                        "stats": [
                            { "stat": { "stat_id": "4", "value": (250 * team).to_string() } },
                            { "stat": { "stat_id": "5", "value": (team + week).to_string() } }
                        ]
                    }
                }
            ]
        })
    }

    fn matchup(league_key: &str, week: usize, a: usize, b: usize) -> Value {
        let start = NaiveDate::from_ymd_opt(2023, 9, 5).unwrap()
            + ChronoDuration::days(7 * (week as i64 - 1));
        let end = start + ChronoDuration::days(6);
        let winner = if points(a, week) > points(b, week) { a } else { b };
        json!({
            "matchup": {
                "week": week.to_string(),
                "week_start": start.format("%Y-%m-%d").to_string(),
                "week_end": end.format("%Y-%m-%d").to_string(),
                "status": "postevent",
                "is_playoffs": if week >= 15 { "1" } else { "0" },
                "is_consolation": "0",
                "is_tied": 0,
                "winner_team_key": team_key(league_key, winner),
                "0": {
                    "teams": indexed(vec![
                        matchup_side(league_key, a, week),
                        matchup_side(league_key, b, week),
                    ])
                }
            }
        })
    }

    pub fn metadata(league_key: &str, season: &str, finished: bool) -> Document {
        content(json!({ "league": [meta(league_key, season, finished)] }))
    }

    pub fn settings(league_key: &str) -> Document {
        league(
            league_key,
            json!({
                "settings": [{
                    "draft_type": "live",
                    "playoff_start_week": "15",
                    "num_playoff_teams": "4",
                    "stat_categories": {
                        "stats": [
                            { "stat": { "stat_id": 4, "enabled": "1", "name": "Passing Yards", "display_name": "Pass Yds" } },
                            { "stat": { "stat_id": 5, "enabled": "1", "name": "Passing Touchdowns", "display_name": "Pass TD" } }
                        ]
                    }
                }]
            }),
        )
    }

    pub fn standings(league_key: &str, teams: usize) -> Document {
        let entries = (1..=teams)
            .map(|i| {
                json!({
                    "team": [
                        [
                            { "team_key": team_key(league_key, i) },
                            { "team_id": i.to_string() },
                            { "name": format!("Team {i}") },
                            { "team_logos": [{ "team_logo": { "size": "large", "url": format!("https://img.test/{i}.png") } }] },
                            { "managers": [{ "manager": { "manager_id": i.to_string(), "nickname": format!("manager{i}") } }] }
                        ],
                        { "team_points": { "coverage_type": "season", "total": format!("{}.5", 1500 - i * 10) } },
                        {
                            "team_standings": {
                                "rank": i,
                                "playoff_seed": i.to_string(),
                                "outcome_totals": {
                                    "wins": (teams - i).to_string(),
                                    "losses": (i - 1).to_string(),
                                    "ties": 0,
                                    "percentage": ".500"
                                },
                                "points_for": format!("{}.5", 1500 - i * 10),
                                "points_against": 1400.25
                            }
                        }
                    ]
                })
            })
            .collect();
        league(league_key, json!({ "standings": [{ "teams": indexed(entries) }] }))
    }

    /// Every team's full schedule, each team listing its own matchups.
    pub fn history(league_key: &str, teams: usize, weeks: usize) -> Document {
        let entries = (1..=teams)
            .map(|team| {
                let own: Vec<Value> = (1..=weeks)
                    .filter_map(|week| {
                        pairings(teams, week)
                            .into_iter()
                            .find(|(a, b)| *a == team || *b == team)
                            .map(|(a, b)| matchup(league_key, week, a, b))
                    })
                    .collect();
                json!({
                    "team": [
                        [
                            { "team_key": team_key(league_key, team) },
                            { "name": format!("Team {team}") }
                        ],
                        { "matchups": indexed(own) }
                    ]
                })
            })
            .collect();
        league(league_key, json!({ "teams": indexed(entries) }))
    }

    pub fn scoreboard(league_key: &str, teams: usize, week: usize) -> Document {
        let entries = pairings(teams, week)
            .into_iter()
            .map(|(a, b)| matchup(league_key, week, a, b))
            .collect();
        league(
            league_key,
            json!({ "scoreboard": { "0": { "matchups": indexed(entries) }, "week": week } }),
        )
    }

    /// Pick `i` drafts player `{game}.p.{99 + i}`.
    pub fn draft_results(league_key: &str, picks: usize) -> Document {
        let game = game_code_of(league_key);
        let entries = (1..=picks)
            .map(|i| {
                json!({
                    "draft_result": {
                        "pick": i,
                        "round": (i - 1) / 4 + 1,
                        "team_key": team_key(league_key, (i - 1) % 4 + 1),
                        "player_key": format!("{game}.p.{}", 99 + i)
                    }
                })
            })
            .collect();
        league(league_key, json!({ "draft_results": indexed(entries) }))
    }

    /// Add/drop transactions, each adding player `{game}.p.100`.
    pub fn transactions(league_key: &str, transaction_keys: &[&str]) -> Document {
        let game = game_code_of(league_key);
        let entries = transaction_keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let player = json!({
                    "player": [
                        [
                            { "player_key": format!("{game}.p.100") },
                            { "player_id": "100" },
                            { "name": { "full": "Player 100", "first": "Player", "last": "100" } }
                        ],
                        {
                            "transaction_data": [{
                                "type": "add",
                                "source_type": "freeagents",
                                "destination_type": "team",
                                "destination_team_key": team_key(league_key, 1)
                            }]
                        }
                    ]
                });
                json!({
                    "transaction": [
                        {
                            "transaction_key": key,
                            "transaction_id": (i + 1).to_string(),
                            "type": "add/drop",
                            "status": "successful",
                            "timestamp": (1_696_000_000 + i * 60).to_string()
                        },
                        { "players": indexed(vec![player]) }
                    ]
                })
            })
            .collect();
        league(league_key, json!({ "transactions": indexed(entries) }))
    }

    pub fn players(player_keys: &[&str]) -> Document {
        let entries = player_keys
            .iter()
            .map(|key| {
                json!({
                    "player": [[
                        { "player_key": key },
                        { "name": { "full": format!("Player {key}") } },
                        { "editorial_team_abbr": "Buf" },
                        { "display_position": "QB" }
                    ]]
                })
            })
            .collect();
        content(json!({ "players": indexed(entries) }))
    }

    /// One game per entry: `(game_key, code, league_key, season, renew, renewed)`.
    pub fn user_leagues(entries: &[(&str, &str, &str, &str, &str, &str)]) -> Document {
        let games = entries
            .iter()
            .map(|(game_key, code, league_key, season, renew, renewed)| {
                json!({
                    "game": [
                        { "game_key": game_key, "code": code, "season": season, "name": "Football" },
                        {
                            "leagues": indexed(vec![json!({
                                "league": [{
                                    "league_key": league_key,
                                    "name": format!("League {league_key}"),
                                    "season": season,
                                    "renew": renew,
                                    "renewed": renewed
                                }]
                            })])
                        }
                    ]
                })
            })
            .collect();
        content(json!({
            "users": indexed(vec![json!({ "user": [{ "guid": "USER1" }, { "games": indexed(games) }] })])
        }))
    }
}

/// Typed records for store and persistence tests.
pub mod records {
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    use super::fixtures::team_key;
    use crate::model::{
        CanonicalMatchup, DraftResultRecord, LeagueRecord, StandingRecord, TeamRecord,
        TransactionRecord,
    };
    use crate::persist::LeagueWrite;
    use crate::reconcile::canonical_id;

    pub fn synced_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 12, 1, 6, 0, 0).unwrap()
    }

    pub fn league(league_key: &str, season: &str) -> LeagueRecord {
        LeagueRecord {
            league_key: league_key.to_string(),
            season: season.to_string(),
            game_code: "423".to_string(),
            name: format!("League {league_key}"),
            num_teams: 4,
            current_week: Some(3),
            start_week: Some(1),
            end_week: Some(16),
            playoff_start_week: Some(15),
            is_finished: false,
            stat_categories: json!([]),
        }
    }

    pub fn teams(league_key: &str, season: &str, n: usize) -> Vec<TeamRecord> {
        (1..=n)
            .map(|i| TeamRecord {
                team_key: team_key(league_key, i),
                league_key: league_key.to_string(),
                season: season.to_string(),
                name: format!("Team {i}"),
                manager_name: Some(format!("manager{i}")),
                logo_url: None,
            })
            .collect()
    }

    pub fn standings(league_key: &str, season: &str, n: usize) -> Vec<StandingRecord> {
        (1..=n)
            .map(|i| StandingRecord {
                team_key: team_key(league_key, i),
                league_key: league_key.to_string(),
                season: season.to_string(),
                rank: Some(i as i32),
                playoff_seed: Some(i as i32),
                wins: (n - i) as i32,
                losses: (i - 1) as i32,
                ties: 0,
                points_for: 1500.0 - i as f64,
                points_against: 1400.0,
            })
            .collect()
    }

    /// `count` matchups between teams 1 and 2, one per week.
    pub fn matchups(league_key: &str, season: &str, count: usize) -> Vec<CanonicalMatchup> {
        (1..=count as i32)
            .map(|week| {
                let (a, b) = (team_key(league_key, 1), team_key(league_key, 2));
                CanonicalMatchup {
                    id: canonical_id(week, &a, &b),
                    league_key: league_key.to_string(),
                    season: season.to_string(),
                    week,
                    week_start: None,
                    week_end: None,
                    team1_key: a.clone(),
                    team2_key: b,
                    team1_points: 110.5,
                    team2_points: 98.25,
                    team1_stats: json!({ "4": "250" }),
                    team2_stats: json!({ "4": "180" }),
                    winner_key: Some(a),
                    is_playoffs: false,
                    is_consolation: false,
                    is_tied: false,
                }
            })
            .collect()
    }

    pub fn draft_results(league_key: &str, season: &str, n: usize) -> Vec<DraftResultRecord> {
        (1..=n)
            .map(|i| DraftResultRecord {
                league_key: league_key.to_string(),
                season: season.to_string(),
                pick: i as i32,
                round: ((i - 1) / 4 + 1) as i32,
                team_key: team_key(league_key, (i - 1) % 4 + 1),
                player_key: Some(format!("423.p.{}", 99 + i)),
                cost: None,
            })
            .collect()
    }

    pub fn transactions(league_key: &str, season: &str, keys: &[&str]) -> Vec<TransactionRecord> {
        keys.iter()
            .map(|key| TransactionRecord {
                transaction_key: key.to_string(),
                league_key: league_key.to_string(),
                season: season.to_string(),
                kind: "add/drop".to_string(),
                status: "successful".to_string(),
                occurred_at: Some(synced_at()),
                players: json!([{ "player_key": "423.p.100", "type": "add" }]),
            })
            .collect()
    }

    /// A league with `n_teams` teams and standings, no matchups, and empty
    /// (but fetched) draft results and transactions.
    pub fn league_write(league_key: &str, season: &str, n_teams: usize) -> LeagueWrite {
        LeagueWrite {
            league: league(league_key, season),
            teams: teams(league_key, season, n_teams),
            standings: standings(league_key, season, n_teams),
            matchups: Vec::new(),
            draft_results: Some(Vec::new()),
            transactions: Some(Vec::new()),
            players: Vec::new(),
            synced_at: synced_at(),
        }
    }
}

enum Scripted {
    Respond(HttpResponse),
    Timeout,
}

/// Scripted HTTP transport.
///
/// A GET is answered by the first matching route, then the next queued
/// response, then the fallback, then 404. Token exchanges hand out
/// `token-1`, `token-2`, … unless told to fail.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(String, HttpResponse)>>,
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<HttpResponse>>,
    latency: Mutex<Duration>,
    token_failure: Mutex<Option<u16>>,
    exchanges: AtomicU64,
    gets: Mutex<Vec<RecordedGet>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Debug, Clone)]
struct RecordedGet {
    at: Instant,
    url: String,
    bearer: String,
    timeout: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always(&self, status: u16, body: impl Into<String>) {
        *self.fallback.lock() = Some(HttpResponse::new(status, body));
    }

    pub fn push(&self, status: u16, body: impl Into<String>) {
        self.queue
            .lock()
            .push_back(Scripted::Respond(HttpResponse::new(status, body)));
    }

    pub fn push_timeout(&self) {
        self.queue.lock().push_back(Scripted::Timeout);
    }

    /// Answer every URL containing `fragment`.
    pub fn route(&self, fragment: &str, status: u16, body: impl Into<String>) {
        self.routes
            .lock()
            .push((fragment.to_string(), HttpResponse::new(status, body)));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn fail_token_exchange(&self, status: u16) {
        *self.token_failure.lock() = Some(status);
    }

    /// Start time of every GET.
    pub fn get_times(&self) -> Vec<Instant> {
        self.gets.lock().iter().map(|g| g.at).collect()
    }

    /// Bearer token sent with every GET.
    pub fn bearers(&self) -> Vec<String> {
        self.gets.lock().iter().map(|g| g.bearer.clone()).collect()
    }

    /// Timeout passed with every GET whose URL contains `fragment`.
    pub fn timeouts_for(&self, fragment: &str) -> Vec<Duration> {
        self.gets
            .lock()
            .iter()
            .filter(|g| g.url.contains(fragment))
            .map(|g| g.timeout)
            .collect()
    }

    /// Most GETs that were awaiting a response at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        if let Some((_, response)) = self
            .routes
            .lock()
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
        {
            return Ok(response.clone());
        }
        match self.queue.lock().pop_front() {
            Some(Scripted::Respond(response)) => return Ok(response),
            Some(Scripted::Timeout) => return Err(TransportError::Timeout(timeout)),
            None => {}
        }
        Ok(self
            .fallback
            .lock()
            .clone()
            .unwrap_or_else(|| HttpResponse::new(404, "not found")))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(
        &self,
        url: &str,
        bearer: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.gets.lock().push(RecordedGet {
            at: Instant::now(),
            url: url.to_string(),
            bearer: bearer.to_string(),
            timeout,
        });
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.answer(url, timeout)
    }

    async fn post_form(
        &self,
        _url: &str,
        _auth: &BasicAuth,
        _form: &[(&str, &str)],
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        if let Some(status) = *self.token_failure.lock() {
            return Ok(HttpResponse::new(status, r#"{"error":"invalid_grant"}"#));
        }
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        let body = json!({
            "access_token": format!("token-{n}"),
            "refresh_token": format!("refresh-{n}"),
            "token_type": "bearer",
            "expires_in": 3600
        });
        Ok(HttpResponse::new(200, body.to_string()))
    }
}

#[derive(Debug, Clone)]
struct FakeLeague {
    season: String,
    teams: usize,
    weeks: usize,
    finished: bool,
}

/// In-memory league source serving fixture documents.
#[derive(Default)]
pub struct FakeSource {
    leagues: Mutex<BTreeMap<String, FakeLeague>>,
    failing: Mutex<HashSet<String>>,
    bundle_fetches: AtomicUsize,
    player_requests: Mutex<Vec<Vec<String>>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_league(&self, league_key: &str, season: &str, teams: usize, weeks: usize, finished: bool) {
        self.leagues.lock().insert(
            league_key.to_string(),
            FakeLeague {
                season: season.to_string(),
                teams,
                weeks,
                finished,
            },
        );
    }

    /// Every fetch for `league_key` fails from now on.
    pub fn fail_league(&self, league_key: &str) {
        self.failing.lock().insert(league_key.to_string());
    }

    pub fn bundle_fetches(&self) -> usize {
        self.bundle_fetches.load(Ordering::SeqCst)
    }

    pub fn player_requests(&self) -> Vec<Vec<String>> {
        self.player_requests.lock().clone()
    }

    fn league(&self, league_key: &str) -> Option<FakeLeague> {
        if self.failing.lock().contains(league_key) {
            return None;
        }
        self.leagues.lock().get(league_key).cloned()
    }
}

#[async_trait]
impl LeagueSource for FakeSource {
    async fn discover_league_keys(&self) -> Result<Vec<LeagueIdentity>, ApiError> {
        Ok(self
            .leagues
            .lock()
            .iter()
            .map(|(key, league)| LeagueIdentity {
                league_key: key.clone(),
                season: league.season.clone(),
                game_code: crate::parse::game_code_of(key),
                game_abbreviation: "nfl".to_string(),
            })
            .collect())
    }

    async fn fetch_league_bundle(&self, league_key: &str) -> LeagueBundle {
        self.bundle_fetches.fetch_add(1, Ordering::SeqCst);
        let league = self.league(league_key);
        let documents = Endpoint::BUNDLE
            .iter()
            .map(|endpoint| {
                let doc = league.as_ref().map(|l| match endpoint {
                    Endpoint::Metadata => fixtures::metadata(league_key, &l.season, l.finished),
                    Endpoint::Settings => fixtures::settings(league_key),
                    Endpoint::Standings => fixtures::standings(league_key, l.teams),
                    Endpoint::Scoreboard => fixtures::scoreboard(league_key, l.teams, l.weeks),
                    Endpoint::DraftResults => fixtures::draft_results(league_key, l.teams),
                    Endpoint::Transactions => {
                        let key = format!("{league_key}.tr.1");
                        fixtures::transactions(league_key, &[key.as_str()])
                    }
                });
                (*endpoint, doc)
            })
            .collect();

        LeagueBundle {
            league_key: league_key.to_string(),
            documents,
        }
    }

    async fn fetch_matchup_history(&self, league_key: &str) -> Result<Document, ApiError> {
        match self.league(league_key) {
            Some(l) => Ok(fixtures::history(league_key, l.teams, l.weeks)),
            None => {
                let url = format!("league/{league_key}/teams/matchups");
                Err(ApiError::ExhaustedRetries {
                    url: url.clone(),
                    attempts: 3,
                    source: Box::new(ApiError::TransientNetwork {
                        url,
                        message: "connection reset".to_string(),
                    }),
                })
            }
        }
    }

    async fn fetch_players(&self, player_keys: &[String]) -> Vec<PlayerRecord> {
        self.player_requests.lock().push(player_keys.to_vec());
        player_keys
            .iter()
            .map(|key| PlayerRecord {
                player_key: key.clone(),
                full_name: format!("Player {key}"),
                team_abbr: None,
                display_position: None,
            })
            .collect()
    }
}
