use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// The two HTTP shapes the client needs.
///
/// Kept behind a trait so retry and refresh logic can be exercised against
/// scripted responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        bearer: &str,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError>;

    async fn post_form(
        &self,
        url: &str,
        auth: &BasicAuth,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        // Per-request timeouts are set on each call; this one only bounds connects.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    async fn finish(
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        bearer: &str,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        Self::finish(self.client.get(url).bearer_auth(bearer), timeout).await
    }

    async fn post_form(
        &self,
        url: &str,
        auth: &BasicAuth,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let request = self
            .client
            .post(url)
            .basic_auth(&auth.username, Some(&auth.password))
            .form(form);
        Self::finish(request, timeout).await
    }
}
