//! HTTP transport for page fetching
//!
//! A thin seam over `reqwest`: one GET with a caller-chosen user agent,
//! returning status and body. Rate limiting, retries and robots handling live
//! in [`crate::infrastructure::fetcher`], which owns a `dyn PageTransport`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    Client,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT},
};
use thiserror::Error;

use crate::infrastructure::config::FetcherConfig;

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("network failure: {message}")]
    Network { message: String },

    #[error("request failed: {message}")]
    Other { message: String },
}

impl TransportError {
    /// Timeouts and connection-level failures are worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }
}

#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get(&self, url: &str, user_agent: &str) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid Accept-Language header")?,
        );

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

fn classify(error: &reqwest::Error) -> TransportError {
    let message = error.to_string();
    if error.is_timeout() {
        TransportError::Timeout { message }
    } else if error.is_connect() || error.is_body() || error.is_request() {
        TransportError::Network { message }
    } else {
        TransportError::Other { message }
    }
}

#[async_trait]
impl PageTransport for ReqwestTransport {
    async fn get(&self, url: &str, user_agent: &str) -> Result<TransportResponse, TransportError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(&e))?;

        tracing::debug!("{} -> {} ({} bytes)", url, status, body.len());
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_builds_from_default_config() {
        assert!(ReqwestTransport::new(&FetcherConfig::default()).is_ok());
    }

    #[test]
    fn invalid_accept_language_is_rejected() {
        let config = FetcherConfig {
            accept_language: "zh\nCN".to_string(),
            ..FetcherConfig::default()
        };
        assert!(ReqwestTransport::new(&config).is_err());
    }

    #[test]
    fn only_network_level_errors_retry() {
        assert!(TransportError::Timeout { message: String::new() }.is_retryable());
        assert!(TransportError::Network { message: String::new() }.is_retryable());
        assert!(!TransportError::Other { message: String::new() }.is_retryable());
    }
}
