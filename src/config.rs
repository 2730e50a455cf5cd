//! Service configuration from the environment.

use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::client::auth::ClientCredentials;
use crate::client::ApiConfig;
use crate::persist::BatchPolicy;
use crate::sync::SyncSettings;

const DEFAULT_BASE_URL: &str = "https://fantasysports.yahooapis.com/fantasy/v2";
const DEFAULT_TOKEN_URL: &str = "https://api.login.yahoo.com/oauth2/get_token";

#[derive(Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncSettings,
    pub batch_policy: BatchPolicy,
    pub cache_ttl: Duration,
    pub database_url: String,
    /// Sync summaries are published only when set.
    pub redis_url: Option<String>,
    pub poll_interval_seconds: u64,
    pub health_port: u16,
    /// If true, sync once and exit (no polling loop)
    pub run_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Secrets come from env vars, or from /run/secrets/* when mounted.
        let client_id = secret("FANTASY_CLIENT_ID", "/run/secrets/fantasy_client_id")?;
        let client_secret = secret("FANTASY_CLIENT_SECRET", "/run/secrets/fantasy_client_secret")?;
        let refresh_token = secret("FANTASY_REFRESH_TOKEN", "/run/secrets/fantasy_refresh_token")?;
        for (name, value) in [
            ("FANTASY_CLIENT_ID", &client_id),
            ("FANTASY_CLIENT_SECRET", &client_secret),
            ("FANTASY_REFRESH_TOKEN", &refresh_token),
        ] {
            reject_placeholder(name, value)?;
        }

        let db_user = env::var("DB_USER").unwrap_or_else(|_| "fantasy".to_string());
        let db_name = env::var("DB_NAME").unwrap_or_else(|_| "fantasy".to_string());
        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "postgres".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());

        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => {
                let db_password = read_secret_file("/run/secrets/db_password", "db_password")?;
                format!("postgresql://{}:{}@{}:{}/{}", db_user, db_password, db_host, db_port, db_name)
            }
        };

        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty());

        let api = ApiConfig {
            base_url: env::var("FANTASY_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            token_url: env::var("FANTASY_TOKEN_URL").unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            credentials: ClientCredentials {
                client_id,
                client_secret,
                refresh_token,
            },
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECONDS", 30)),
            matchup_history_timeout: Duration::from_secs(env_or("MATCHUP_HISTORY_TIMEOUT_SECONDS", 120)),
            max_retries: env_or("MAX_RETRIES", 3),
            initial_backoff: Duration::from_millis(env_or("INITIAL_BACKOFF_MS", 1000)),
            // 0 disables the client-side quota.
            requests_per_minute: NonZeroU32::new(env_or("REQUESTS_PER_MINUTE", 60)),
            player_fetch_concurrency: env_or("PLAYER_FETCH_CONCURRENCY", 3),
            anchor_league_key: env::var("ANCHOR_LEAGUE_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        };

        let sync = SyncSettings {
            freshness_window: Duration::from_secs(env_or::<u64>("FRESHNESS_WINDOW_HOURS", 6) * 3600),
            league_concurrency: env_or("LEAGUE_CONCURRENCY", 3),
            batch_delay: Duration::from_millis(env_or("BATCH_DELAY_MS", 1000)),
            force_refresh: parse_flag(&env::var("FORCE_REFRESH").unwrap_or_default()),
            seasons: parse_seasons(&env::var("SYNC_SEASONS").unwrap_or_default()),
        };

        let batch_policy = BatchPolicy {
            max_batch_size: env_or("MAX_BATCH_SIZE", 500),
            ..BatchPolicy::default()
        };

        Ok(Self {
            api,
            sync,
            batch_policy,
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL_SECONDS", 300)),
            database_url,
            redis_url,
            poll_interval_seconds: env_or("POLL_INTERVAL_SECONDS", 3600),
            health_port: env_or("HEALTH_PORT", 8084),
            run_once: parse_flag(&env::var("RUN_ONCE").unwrap_or_default()),
        })
    }
}

fn secret(var: &str, file_path: &str) -> Result<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Ok(_) => Err(anyhow!("{} is set but empty", var)),
        Err(_) => read_secret_file(file_path, var),
    }
}

/// Read a secret from a mounted secret file.
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .with_context(|| {
            format!(
                "Secret {} not set and no secret file at {}",
                secret_name, file_path
            )
        })
}

/// Refuse sample values copied from templates.
fn reject_placeholder(name: &str, value: &str) -> Result<()> {
    let lower = value.trim().to_lowercase();
    if lower.is_empty()
        || lower.contains("change_me")
        || lower.contains("your_")
        || lower.starts_with("sample")
    {
        return Err(anyhow!(
            "{} appears to be a placeholder value; replace it with a real credential",
            name
        ));
    }
    Ok(())
}

fn env_or<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// `"2023, 2024"` → `["2023", "2024"]`.
pub fn parse_seasons(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
