//! Bearer credential lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::transport::{BasicAuth, HttpTransport};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Client id, client secret and the long-lived refresh secret.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// Owns the credential. Exchanges are serialized by `refresh_lock`, so a burst
/// of 401s from concurrent requests produces a single token exchange.
pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    auth: BasicAuth,
    timeout: Duration,
    refresh_secret: RwLock<String>,
    credential: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
    exchanges: AtomicU64,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        token_url: impl Into<String>,
        credentials: ClientCredentials,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
            auth: BasicAuth {
                username: credentials.client_id,
                password: credentials.client_secret,
            },
            timeout,
            refresh_secret: RwLock::new(credentials.refresh_token),
            credential: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Initial exchange; nothing else can succeed without it.
    pub async fn initialize(&self) -> Result<(), ApiError> {
        let _guard = self.refresh_lock.lock().await;
        self.exchange().await.map(|_| ())
    }

    /// Current access token, exchanging for one on first use.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.current_token() {
            return Ok(token);
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.current_token() {
            return Ok(token);
        }
        self.exchange().await
    }

    /// Replace a token the API rejected.
    ///
    /// If another task already swapped in a different token while we waited
    /// on the lock, that token is used as-is.
    pub async fn refresh_after_rejection(&self, rejected: &str) -> Result<(), ApiError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.credential();
        if let Some(current) = current {
            if current.access_token != rejected {
                debug!("Credential already refreshed by a concurrent request");
                return Ok(());
            }
            if current.is_expired(Utc::now()) {
                debug!("Rejected credential had passed its expiry");
            }
        }
        self.exchange().await.map(|_| ())
    }

    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    /// Number of token exchanges performed so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    fn current_token(&self) -> Option<String> {
        self.credential
            .read()
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    async fn exchange(&self) -> Result<String, ApiError> {
        let refresh_secret = self.refresh_secret.read().clone();
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_secret.as_str()),
            ("redirect_uri", "oob"),
        ];

        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .post_form(&self.token_url, &self.auth, &form, self.timeout)
            .await
            .map_err(|e| ApiError::TokenExchange {
                status: 0,
                message: e.to_string(),
            })?;

        if !response.is_success() {
            warn!(status = response.status, "Token exchange rejected");
            return Err(ApiError::TokenExchange {
                status: response.status,
                message: response.body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| ApiError::TokenExchange {
                status: response.status,
                message: format!("unreadable token response: {e}"),
            })?;

        let refresh_token = token.refresh_token.unwrap_or(refresh_secret);
        let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(3600));
        *self.refresh_secret.write() = refresh_token.clone();

        let access_token = token.access_token;
        *self.credential.write() = Some(Credential {
            access_token: access_token.clone(),
            refresh_token,
            token_type: token.token_type,
            expires_at,
        });

        info!(expires_at = %expires_at, "Obtained API access token");
        Ok(access_token)
    }
}
