use std::time::Duration;

use thiserror::Error;

/// Failures raised by the authenticated API client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authorization rejected for {url}")]
    AuthExpired { url: String },

    #[error("rate limited on {url}")]
    RateLimited { url: String },

    #[error("network failure on {url}: {message}")]
    TransientNetwork { url: String, message: String },

    #[error("unexpected status {status} from {url}: {body}")]
    UnexpectedStatus { url: String, status: u16, body: String },

    #[error("malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("gave up on {url} after {attempts} attempts: {source}")]
    ExhaustedRetries {
        url: String,
        attempts: u32,
        #[source]
        source: Box<ApiError>,
    },

    #[error("token exchange failed (status {status}): {message}")]
    TokenExchange { status: u16, message: String },

    #[error("no anchor league configured for renewal-chain discovery")]
    AnchorNotConfigured,
}

impl ApiError {
    /// URL the failure is attributed to, when there is one.
    pub fn url(&self) -> Option<&str> {
        match self {
            ApiError::AuthExpired { url }
            | ApiError::RateLimited { url }
            | ApiError::TransientNetwork { url, .. }
            | ApiError::UnexpectedStatus { url, .. }
            | ApiError::MalformedResponse { url, .. }
            | ApiError::ExhaustedRetries { url, .. } => Some(url),
            ApiError::TokenExchange { .. } | ApiError::AnchorNotConfigured => None,
        }
    }
}

/// Failures raised by a record store.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transaction '{label}' exceeded {timeout:?}")]
    Timeout { label: String, timeout: Duration },

    #[error("store rejected batch '{label}': {message}")]
    Rejected { label: String, message: String },
}

/// Failures surfaced by the coalescing cache when no stale value can stand in.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("fetch for cache key '{key}' failed: {message}")]
    Fetch { key: String, message: String },
}

/// Per-league failure, converted to an error string at the orchestrator boundary.
#[derive(Error, Debug)]
pub enum LeagueError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("persistence failure: {0}")]
    Persist(#[from] PersistError),

    #[error("missing data: {0}")]
    MissingData(String),
}
