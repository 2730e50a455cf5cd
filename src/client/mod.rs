//! Authenticated client for the fantasy sports API.

pub mod auth;
pub mod transport;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::discovery::trace_renewal_chain;
use crate::document::Document;
use crate::error::ApiError;
use crate::model::{LeagueIdentity, PlayerRecord};
use crate::parse;

use auth::{ClientCredentials, TokenManager};
use transport::HttpTransport;

pub type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Player keys per players request; the API rejects longer lists.
pub const PLAYER_KEYS_PER_REQUEST: usize = 25;

#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token_url: String,
    pub credentials: ClientCredentials,
    pub request_timeout: Duration,
    /// The matchup-history endpoint returns every team's full schedule.
    pub matchup_history_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub requests_per_minute: Option<NonZeroU32>,
    /// Player requests in flight across all leagues at once.
    pub player_fetch_concurrency: usize,
    /// Starting point of the renewal-chain trace used by discovery.
    pub anchor_league_key: Option<String>,
}

/// League endpoints fetched together for every sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Metadata,
    Settings,
    Standings,
    Scoreboard,
    DraftResults,
    Transactions,
}

impl Endpoint {
    pub const BUNDLE: [Endpoint; 6] = [
        Endpoint::Metadata,
        Endpoint::Settings,
        Endpoint::Standings,
        Endpoint::Scoreboard,
        Endpoint::DraftResults,
        Endpoint::Transactions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Metadata => "metadata",
            Endpoint::Settings => "settings",
            Endpoint::Standings => "standings",
            Endpoint::Scoreboard => "scoreboard",
            Endpoint::DraftResults => "draftresults",
            Endpoint::Transactions => "transactions",
        }
    }

    pub fn path(&self, league_key: &str) -> String {
        format!("league/{}/{}", league_key, self.name())
    }
}

/// Documents for one league; `None` marks an endpoint that failed.
#[derive(Debug, Clone, Default)]
pub struct LeagueBundle {
    pub league_key: String,
    pub documents: HashMap<Endpoint, Option<Document>>,
}

impl LeagueBundle {
    pub fn get(&self, endpoint: Endpoint) -> Option<&Document> {
        self.documents.get(&endpoint).and_then(Option::as_ref)
    }

    pub fn failed_endpoints(&self) -> Vec<&'static str> {
        Endpoint::BUNDLE
            .iter()
            .filter(|e| self.get(**e).is_none())
            .map(Endpoint::name)
            .collect()
    }
}

/// Everything the sync orchestrator needs from the upstream API.
#[async_trait]
pub trait LeagueSource: Send + Sync {
    async fn discover_league_keys(&self) -> Result<Vec<LeagueIdentity>, ApiError>;

    async fn fetch_league_bundle(&self, league_key: &str) -> LeagueBundle;

    async fn fetch_matchup_history(&self, league_key: &str) -> Result<Document, ApiError>;

    /// Player metadata; chunks that fail are left out.
    async fn fetch_players(&self, player_keys: &[String]) -> Vec<PlayerRecord>;
}

pub struct ApiClient {
    config: ApiConfig,
    transport: Arc<dyn HttpTransport>,
    tokens: TokenManager,
    rate_limiter: Option<DirectRateLimiter>,
    player_permits: Semaphore,
}

impl ApiClient {
    pub fn new(config: ApiConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let tokens = TokenManager::new(
            Arc::clone(&transport),
            config.token_url.clone(),
            config.credentials.clone(),
            config.request_timeout,
        );
        let rate_limiter = config
            .requests_per_minute
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));
        let player_permits = Semaphore::new(config.player_fetch_concurrency.max(1));

        Self {
            config,
            transport,
            tokens,
            rate_limiter,
            player_permits,
        }
    }

    /// Perform the initial token exchange.
    pub async fn initialize(&self) -> Result<(), ApiError> {
        self.tokens.initialize().await
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}?format=json",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GET with the default retry budget and timeout.
    pub async fn get(&self, path: &str) -> Result<Document, ApiError> {
        self.request(
            &self.url(path),
            self.config.max_retries,
            self.config.initial_backoff,
        )
        .await
    }

    pub async fn request(
        &self,
        url: &str,
        retries_remaining: u32,
        backoff: Duration,
    ) -> Result<Document, ApiError> {
        self.request_with_timeout(url, retries_remaining, backoff, self.config.request_timeout)
            .await
    }

    /// Issue an authenticated GET.
    ///
    /// 401 refreshes the credential and retries; 429 and every other failure
    /// sleep for the current backoff and retry. Each retry doubles the
    /// backoff. A body that does not parse is returned as
    /// `MalformedResponse` immediately.
    pub async fn request_with_timeout(
        &self,
        url: &str,
        retries_remaining: u32,
        backoff: Duration,
        timeout: Duration,
    ) -> Result<Document, ApiError> {
        let mut retries_remaining = retries_remaining;
        let mut backoff = backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            let token = self.tokens.access_token().await?;
            let failure = match self.transport.get(url, &token, timeout).await {
                Ok(response) if response.is_success() => {
                    return Document::parse(&response.body).map_err(|e| {
                        ApiError::MalformedResponse {
                            url: url.to_string(),
                            message: e.to_string(),
                        }
                    });
                }
                Ok(response) if response.status == 401 => ApiError::AuthExpired {
                    url: url.to_string(),
                },
                Ok(response) if response.status == 429 => ApiError::RateLimited {
                    url: url.to_string(),
                },
                Ok(response) => ApiError::UnexpectedStatus {
                    url: url.to_string(),
                    status: response.status,
                    body: response.body,
                },
                Err(e) => ApiError::TransientNetwork {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            };

            if retries_remaining == 0 {
                warn!(url, attempts, error = %failure, "Retries exhausted");
                return Err(ApiError::ExhaustedRetries {
                    url: url.to_string(),
                    attempts,
                    source: Box::new(failure),
                });
            }

            match failure {
                ApiError::AuthExpired { .. } => {
                    info!(url, "Access token rejected, refreshing");
                    if let Err(e) = self.tokens.refresh_after_rejection(&token).await {
                        warn!(url, error = %e, "Token refresh failed, backing off");
                        tokio::time::sleep(backoff).await;
                    }
                }
                ApiError::RateLimited { .. } => {
                    warn!(url, delay_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                }
                other => {
                    warn!(
                        url,
                        delay_ms = backoff.as_millis() as u64,
                        error = %other,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }

            retries_remaining -= 1;
            backoff = backoff.saturating_mul(2);
        }
    }

    async fn get_with_timeout(&self, path: &str, timeout: Duration) -> Result<Document, ApiError> {
        self.request_with_timeout(
            &self.url(path),
            self.config.max_retries,
            self.config.initial_backoff,
            timeout,
        )
        .await
    }
}

#[async_trait]
impl LeagueSource for ApiClient {
    /// Leagues reachable from the configured anchor through renewal links.
    async fn discover_league_keys(&self) -> Result<Vec<LeagueIdentity>, ApiError> {
        let anchor = self
            .config
            .anchor_league_key
            .as_deref()
            .ok_or(ApiError::AnchorNotConfigured)?;

        let doc = self.get("users;use_login=1/games/leagues").await?;
        let discovered = parse::discovered_leagues(&doc);
        let chain = trace_renewal_chain(&discovered, anchor);

        info!(
            discovered = discovered.len(),
            in_chain = chain.len(),
            anchor,
            "Discovered leagues"
        );
        Ok(chain)
    }

    async fn fetch_league_bundle(&self, league_key: &str) -> LeagueBundle {
        let fetches = Endpoint::BUNDLE.iter().map(|endpoint| async move {
            match self.get(&endpoint.path(league_key)).await {
                Ok(doc) => (*endpoint, Some(doc)),
                Err(e) => {
                    warn!(league_key, endpoint = endpoint.name(), error = %e, "Endpoint fetch failed");
                    (*endpoint, None)
                }
            }
        });

        let documents = futures::future::join_all(fetches)
            .await
            .into_iter()
            .collect::<HashMap<_, _>>();

        LeagueBundle {
            league_key: league_key.to_string(),
            documents,
        }
    }

    async fn fetch_matchup_history(&self, league_key: &str) -> Result<Document, ApiError> {
        debug!(league_key, "Fetching matchup history");
        self.get_with_timeout(
            &format!("league/{}/teams/matchups", league_key),
            self.config.matchup_history_timeout,
        )
        .await
    }

    async fn fetch_players(&self, player_keys: &[String]) -> Vec<PlayerRecord> {
        let chunks: Vec<String> = player_keys
            .chunks(PLAYER_KEYS_PER_REQUEST)
            .map(|chunk| chunk.join(","))
            .collect();
        let concurrency = self.config.player_fetch_concurrency.max(1);

        let results: Vec<Vec<PlayerRecord>> = stream::iter(chunks)
            .map(|keys| async move {
                // Shared with concurrent league syncs.
                let _permit = match self.player_permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };
                match self.get(&format!("players;player_keys={}", keys)).await {
                    Ok(doc) => parse::players(&doc),
                    Err(e) => {
                        warn!(error = %e, "Player metadata chunk failed");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }
}
