//! Sync summaries published to a Redis stream.

use anyhow::{Context, Result};
use redis::AsyncCommands;
use tracing::info;

use crate::connect::with_backoff;
use crate::sync::SyncSummary;

pub const SYNC_STREAM: &str = "fantasy.sync";

pub struct SyncPublisher {
    redis: redis::aio::ConnectionManager,
}

impl SyncPublisher {
    /// A malformed URL fails at once; connection errors are retried.
    pub async fn connect(url: &str, max_retries: u32) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
        let redis = with_backoff("Redis", max_retries, || {
            redis::aio::ConnectionManager::new(client.clone())
        })
        .await?;
        Ok(Self { redis })
    }

    pub async fn publish(&self, summary: &SyncSummary) -> Result<()> {
        let mut conn = self.redis.clone();
        let fields = summary_fields(summary)?;
        let _: String = conn.xadd(SYNC_STREAM, "*", &fields).await?;
        info!(run_id = %summary.run_id, "Published sync summary to {}", SYNC_STREAM);
        Ok(())
    }
}

/// Stream entry fields: flat counts for consumers that filter, plus the full
/// summary as JSON.
pub fn summary_fields(summary: &SyncSummary) -> serde_json::Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("run_id", summary.run_id.to_string()),
        ("leagues_processed", summary.leagues_processed.to_string()),
        ("leagues_skipped", summary.leagues_skipped.to_string()),
        ("matchups_processed", summary.matchups_processed.to_string()),
        ("errors", summary.errors.len().to_string()),
        ("failures", summary.failures.to_string()),
        ("finished_at", summary.finished_at.to_rfc3339()),
        ("data", serde_json::to_string(summary)?),
    ])
}
