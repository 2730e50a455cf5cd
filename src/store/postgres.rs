use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::schema::SCHEMA;
use super::{ReplaceScope, Store, WriteBatch, WriteOp};
use crate::connect::with_backoff;
use crate::error::PersistError;
use crate::model::{CanonicalMatchup, LeagueSyncState, TeamRecord};

pub struct PostgresStore {
    db: PgPool,
}

impl PostgresStore {
    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Connect with exponential backoff between attempts.
    pub async fn connect(url: &str, max_retries: u32) -> Result<Self> {
        let pool = with_backoff("PostgreSQL", max_retries, || {
            PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
        })
        .await?;
        Ok(Self::from_pool(pool))
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.db)
                .await
                .context("Failed to apply schema")?;
        }
        debug!("Schema up to date");
        Ok(())
    }
}

async fn apply(conn: &mut PgConnection, op: WriteOp) -> Result<(), sqlx::Error> {
    match op {
        WriteOp::UpsertLeague(league) => {
            sqlx::query(
                r#"
                INSERT INTO leagues (
                    league_key, season, game_code, name, num_teams, current_week,
                    start_week, end_week, playoff_start_week, is_finished, stat_categories
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (league_key) DO UPDATE SET
                    season = EXCLUDED.season,
                    game_code = EXCLUDED.game_code,
                    name = EXCLUDED.name,
                    num_teams = EXCLUDED.num_teams,
                    current_week = EXCLUDED.current_week,
                    start_week = EXCLUDED.start_week,
                    end_week = EXCLUDED.end_week,
                    playoff_start_week = EXCLUDED.playoff_start_week,
                    is_finished = EXCLUDED.is_finished,
                    stat_categories = EXCLUDED.stat_categories
                "#,
            )
            .bind(league.league_key)
            .bind(league.season)
            .bind(league.game_code)
            .bind(league.name)
            .bind(league.num_teams)
            .bind(league.current_week)
            .bind(league.start_week)
            .bind(league.end_week)
            .bind(league.playoff_start_week)
            .bind(league.is_finished)
            .bind(league.stat_categories)
            .execute(&mut *conn)
            .await?;
        }
        WriteOp::UpsertTeams(teams) => {
            if teams.is_empty() {
                return Ok(());
            }
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO teams (team_key, season, league_key, name, manager_name, logo_url) ",
            );
            qb.push_values(teams, |mut row, t| {
                row.push_bind(t.team_key)
                    .push_bind(t.season)
                    .push_bind(t.league_key)
                    .push_bind(t.name)
                    .push_bind(t.manager_name)
                    .push_bind(t.logo_url);
            });
            qb.push(
                " ON CONFLICT (team_key, season) DO UPDATE SET \
                 league_key = EXCLUDED.league_key, name = EXCLUDED.name, \
                 manager_name = EXCLUDED.manager_name, logo_url = EXCLUDED.logo_url",
            );
            qb.build().execute(&mut *conn).await?;
        }
        WriteOp::UpsertStandings(rows) => {
            if rows.is_empty() {
                return Ok(());
            }
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO standings (team_key, season, league_key, rank, playoff_seed, \
                 wins, losses, ties, points_for, points_against) ",
            );
            qb.push_values(rows, |mut row, s| {
                row.push_bind(s.team_key)
                    .push_bind(s.season)
                    .push_bind(s.league_key)
                    .push_bind(s.rank)
                    .push_bind(s.playoff_seed)
                    .push_bind(s.wins)
                    .push_bind(s.losses)
                    .push_bind(s.ties)
                    .push_bind(s.points_for)
                    .push_bind(s.points_against);
            });
            qb.push(
                " ON CONFLICT (team_key, season) DO UPDATE SET \
                 league_key = EXCLUDED.league_key, rank = EXCLUDED.rank, \
                 playoff_seed = EXCLUDED.playoff_seed, wins = EXCLUDED.wins, \
                 losses = EXCLUDED.losses, ties = EXCLUDED.ties, \
                 points_for = EXCLUDED.points_for, points_against = EXCLUDED.points_against",
            );
            qb.build().execute(&mut *conn).await?;
        }
        WriteOp::UpsertMatchups(matchups) => {
            if matchups.is_empty() {
                return Ok(());
            }
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO matchups (id, league_key, season, week, week_start, week_end, \
                 team1_key, team2_key, team1_points, team2_points, team1_stats, team2_stats, \
                 winner_key, is_playoffs, is_consolation, is_tied) ",
            );
            qb.push_values(matchups, |mut row, m| {
                row.push_bind(m.id)
                    .push_bind(m.league_key)
                    .push_bind(m.season)
                    .push_bind(m.week)
                    .push_bind(m.week_start)
                    .push_bind(m.week_end)
                    .push_bind(m.team1_key)
                    .push_bind(m.team2_key)
                    .push_bind(m.team1_points)
                    .push_bind(m.team2_points)
                    .push_bind(m.team1_stats)
                    .push_bind(m.team2_stats)
                    .push_bind(m.winner_key)
                    .push_bind(m.is_playoffs)
                    .push_bind(m.is_consolation)
                    .push_bind(m.is_tied);
            });
            qb.push(
                " ON CONFLICT (league_key, season, id) DO UPDATE SET \
                 week = EXCLUDED.week, week_start = EXCLUDED.week_start, \
                 week_end = EXCLUDED.week_end, team1_key = EXCLUDED.team1_key, \
                 team2_key = EXCLUDED.team2_key, team1_points = EXCLUDED.team1_points, \
                 team2_points = EXCLUDED.team2_points, team1_stats = EXCLUDED.team1_stats, \
                 team2_stats = EXCLUDED.team2_stats, winner_key = EXCLUDED.winner_key, \
                 is_playoffs = EXCLUDED.is_playoffs, is_consolation = EXCLUDED.is_consolation, \
                 is_tied = EXCLUDED.is_tied",
            );
            qb.build().execute(&mut *conn).await?;
        }
        WriteOp::UpsertPlayers(players) => {
            if players.is_empty() {
                return Ok(());
            }
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO players (player_key, full_name, team_abbr, display_position) ",
            );
            qb.push_values(players, |mut row, p| {
                row.push_bind(p.player_key)
                    .push_bind(p.full_name)
                    .push_bind(p.team_abbr)
                    .push_bind(p.display_position);
            });
            qb.push(
                " ON CONFLICT (player_key) DO UPDATE SET \
                 full_name = EXCLUDED.full_name, team_abbr = EXCLUDED.team_abbr, \
                 display_position = EXCLUDED.display_position",
            );
            qb.build().execute(&mut *conn).await?;
        }
        WriteOp::DeleteScope(scope) => {
            let (sql, league_key, season) = match scope {
                ReplaceScope::DraftResults { league_key, season } => (
                    "DELETE FROM draft_results WHERE league_key = $1 AND season = $2",
                    league_key,
                    season,
                ),
                ReplaceScope::Transactions { league_key, season } => (
                    "DELETE FROM transactions WHERE league_key = $1 AND season = $2",
                    league_key,
                    season,
                ),
            };
            sqlx::query(sql)
                .bind(league_key)
                .bind(season)
                .execute(&mut *conn)
                .await?;
        }
        WriteOp::InsertDraftResults(rows) => {
            if rows.is_empty() {
                return Ok(());
            }
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO draft_results (league_key, season, pick, round, team_key, player_key, cost) ",
            );
            qb.push_values(rows, |mut row, d| {
                row.push_bind(d.league_key)
                    .push_bind(d.season)
                    .push_bind(d.pick)
                    .push_bind(d.round)
                    .push_bind(d.team_key)
                    .push_bind(d.player_key)
                    .push_bind(d.cost);
            });
            qb.build().execute(&mut *conn).await?;
        }
        WriteOp::InsertTransactions(rows) => {
            if rows.is_empty() {
                return Ok(());
            }
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO transactions (transaction_key, league_key, season, kind, status, occurred_at, players) ",
            );
            qb.push_values(rows, |mut row, t| {
                row.push_bind(t.transaction_key)
                    .push_bind(t.league_key)
                    .push_bind(t.season)
                    .push_bind(t.kind)
                    .push_bind(t.status)
                    .push_bind(t.occurred_at)
                    .push_bind(t.players);
            });
            qb.build().execute(&mut *conn).await?;
        }
        WriteOp::MarkSynced { league_key, at } => {
            sqlx::query("UPDATE leagues SET last_synced_at = $2 WHERE league_key = $1")
                .bind(league_key)
                .bind(at)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Store for PostgresStore {
    async fn execute(&self, batch: WriteBatch, timeout: Duration) -> Result<(), PersistError> {
        let label = batch.label;
        let ops = batch.ops;

        let work = async {
            let mut tx = self.db.begin().await?;
            sqlx::query(&format!(
                "SET LOCAL statement_timeout = {}",
                timeout.as_millis()
            ))
            .execute(&mut *tx)
            .await?;
            for op in ops {
                apply(&mut tx, op).await?;
            }
            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result.map_err(PersistError::from),
            Err(_) => Err(PersistError::Timeout { label, timeout }),
        }
    }

    async fn league_sync_state(
        &self,
        league_key: &str,
    ) -> Result<Option<LeagueSyncState>, PersistError> {
        let row: Option<(Option<DateTime<Utc>>, bool, bool, bool)> = sqlx::query_as(
            r#"
            SELECT
              l.last_synced_at,
              l.is_finished,
              EXISTS(SELECT 1 FROM teams t WHERE t.league_key = l.league_key) AS has_teams,
              EXISTS(SELECT 1 FROM matchups m WHERE m.league_key = l.league_key) AS has_matchups
            FROM leagues l
            WHERE l.league_key = $1
            "#,
        )
        .bind(league_key)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(
            |(last_synced_at, is_finished, has_teams, has_matchups)| LeagueSyncState {
                last_synced_at,
                is_finished,
                has_teams,
                has_matchups,
            },
        ))
    }

    async fn all_teams(&self) -> Result<Vec<TeamRecord>, PersistError> {
        let teams = sqlx::query_as::<_, TeamRecord>(
            "SELECT team_key, league_key, season, name, manager_name, logo_url \
             FROM teams ORDER BY season, league_key, team_key",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(teams)
    }

    async fn all_matchups(&self) -> Result<Vec<CanonicalMatchup>, PersistError> {
        let matchups = sqlx::query_as::<_, CanonicalMatchup>(
            r#"
            SELECT id, league_key, season, week, week_start, week_end,
                   team1_key, team2_key, team1_points, team2_points,
                   team1_stats, team2_stats, winner_key,
                   is_playoffs, is_consolation, is_tied
            FROM matchups
            ORDER BY season, league_key, week, id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(matchups)
    }
}
