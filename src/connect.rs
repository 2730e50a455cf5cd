//! Startup connections to backing services.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

/// Run `attempt` until it succeeds or `max_retries` attempts have failed,
/// sleeping 2^n seconds after the n-th failure.
pub async fn with_backoff<T, E, F, Fut>(service: &str, max_retries: u32, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_retries = max_retries.max(1);
    let mut failures = 0;
    loop {
        match attempt().await {
            Ok(conn) => {
                info!("Connected to {}", service);
                return Ok(conn);
            }
            Err(e) => {
                failures += 1;
                if failures >= max_retries {
                    return Err(anyhow!(
                        "Failed to connect to {} after {} attempts: {}",
                        service,
                        max_retries,
                        e
                    ));
                }
                warn!("{} connection attempt {} failed: {}. Retrying...", service, failures, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(failures))).await;
            }
        }
    }
}
