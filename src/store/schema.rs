//! Table definitions applied at startup.

pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS leagues (
        league_key          TEXT PRIMARY KEY,
        season              TEXT NOT NULL,
        game_code           TEXT NOT NULL,
        name                TEXT NOT NULL,
        num_teams           INTEGER NOT NULL DEFAULT 0,
        current_week        INTEGER,
        start_week          INTEGER,
        end_week            INTEGER,
        playoff_start_week  INTEGER,
        is_finished         BOOLEAN NOT NULL DEFAULT FALSE,
        stat_categories     JSONB NOT NULL DEFAULT '[]'::jsonb,
        last_synced_at      TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        team_key      TEXT NOT NULL,
        season        TEXT NOT NULL,
        league_key    TEXT NOT NULL REFERENCES leagues (league_key),
        name          TEXT NOT NULL,
        manager_name  TEXT,
        logo_url      TEXT,
        PRIMARY KEY (team_key, season)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS standings (
        team_key        TEXT NOT NULL,
        season          TEXT NOT NULL,
        league_key      TEXT NOT NULL REFERENCES leagues (league_key),
        rank            INTEGER,
        playoff_seed    INTEGER,
        wins            INTEGER NOT NULL DEFAULT 0,
        losses          INTEGER NOT NULL DEFAULT 0,
        ties            INTEGER NOT NULL DEFAULT 0,
        points_for      DOUBLE PRECISION NOT NULL DEFAULT 0,
        points_against  DOUBLE PRECISION NOT NULL DEFAULT 0,
        PRIMARY KEY (team_key, season)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS matchups (
        id              TEXT NOT NULL,
        league_key      TEXT NOT NULL REFERENCES leagues (league_key),
        season          TEXT NOT NULL,
        week            INTEGER NOT NULL,
        week_start      DATE,
        week_end        DATE,
        team1_key       TEXT NOT NULL,
        team2_key       TEXT NOT NULL,
        team1_points    DOUBLE PRECISION NOT NULL,
        team2_points    DOUBLE PRECISION NOT NULL,
        team1_stats     JSONB NOT NULL,
        team2_stats     JSONB NOT NULL,
        winner_key      TEXT,
        is_playoffs     BOOLEAN NOT NULL DEFAULT FALSE,
        is_consolation  BOOLEAN NOT NULL DEFAULT FALSE,
        is_tied         BOOLEAN NOT NULL DEFAULT FALSE,
        PRIMARY KEY (league_key, season, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS draft_results (
        league_key  TEXT NOT NULL REFERENCES leagues (league_key),
        season      TEXT NOT NULL,
        pick        INTEGER NOT NULL,
        round       INTEGER NOT NULL,
        team_key    TEXT NOT NULL,
        player_key  TEXT,
        cost        INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS draft_results_scope ON draft_results (league_key, season)",
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        transaction_key  TEXT NOT NULL,
        league_key       TEXT NOT NULL REFERENCES leagues (league_key),
        season           TEXT NOT NULL,
        kind             TEXT NOT NULL,
        status           TEXT NOT NULL,
        occurred_at      TIMESTAMPTZ,
        players          JSONB NOT NULL DEFAULT '[]'::jsonb
    )
    "#,
    "CREATE INDEX IF NOT EXISTS transactions_scope ON transactions (league_key, season)",
    r#"
    CREATE TABLE IF NOT EXISTS players (
        player_key        TEXT PRIMARY KEY,
        full_name         TEXT NOT NULL,
        team_abbr         TEXT,
        display_position  TEXT
    )
    "#,
];
