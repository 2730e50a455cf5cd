//! Health endpoint and cache-fronted read routes.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use tokio::sync::RwLock;

use crate::model::{CanonicalMatchup, TeamRecord};
use crate::reader::AnalyticsReader;
use crate::sync::SyncSummary;

/// Service health state
#[derive(Clone, Default)]
pub struct HealthState {
    pub last_sync: Arc<RwLock<Option<SyncSummary>>>,
    /// Runs in a row that reported at least one failure.
    pub error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_run(&self, summary: &SyncSummary) {
        if summary.is_clean() {
            *self.error_count.write().await = 0;
        } else {
            *self.error_count.write().await += 1;
        }
        *self.last_sync.write().await = Some(summary.clone());
    }
}

#[derive(Clone)]
pub struct AppState {
    pub health: HealthState,
    pub reader: Arc<AnalyticsReader>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/teams", get(teams_handler))
        .route("/matchups", get(matchups_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let last_sync = state.health.last_sync.read().await.clone();
    let errors = *state.health.error_count.read().await;

    let status = if errors > 3 { "degraded" } else { "ok" };
    let http_status = if errors > 6 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "fantasy-ingestion",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "last_sync": last_sync,
            "consecutive_errors": errors,
            "cache": state.reader.stats(),
        })),
    )
}

async fn teams_handler(State(state): State<AppState>) -> Json<Vec<TeamRecord>> {
    let teams = state.reader.get_all_teams().await;
    Json(teams.as_ref().clone())
}

async fn matchups_handler(State(state): State<AppState>) -> Json<Vec<CanonicalMatchup>> {
    let matchups = state.reader.get_all_matchups().await;
    Json(matchups.as_ref().clone())
}
