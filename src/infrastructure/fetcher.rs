//! Rate-limited page fetcher
//!
//! Every request, from any worker, passes through one shared `governor`
//! limiter. Transient failures (timeouts, network errors, retryable HTTP
//! statuses) are retried with exponential backoff; anything else, or running
//! out of attempts, yields a typed [`FetchError`] for that URL only.

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::RawPage;
use crate::infrastructure::backoff::BackoffPolicy;
use crate::infrastructure::config::FetcherConfig;
use crate::infrastructure::http_client::{PageTransport, TransportError};
use crate::infrastructure::robots::{RobotsCache, RobotsRules};

const FALLBACK_USER_AGENT: &str = "genshin-data-sync/0.3";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("{url} is disallowed by robots.txt")]
    DisallowedByRobots { url: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16, attempts: u32 },

    #[error("{url} failed after {attempts} attempts: {last_cause}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_cause: String,
    },

    #[error("request to {url} failed: {cause}")]
    Transport { url: String, cause: TransportError },

    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Snapshot of the fetcher's request counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct FetchCounters {
    requests: AtomicU64,
    failures: AtomicU64,
}

impl FetchCounters {
    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FetchStats {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let failed_requests = self.failures.load(Ordering::Relaxed);
        let success_rate = if total_requests == 0 {
            1.0
        } else {
            (total_requests - failed_requests) as f64 / total_requests as f64
        };
        FetchStats {
            total_requests,
            failed_requests,
            success_rate,
        }
    }
}

pub struct RateLimitedFetcher {
    transport: Arc<dyn PageTransport>,
    limiter: Arc<DefaultDirectRateLimiter>,
    policy: BackoffPolicy,
    retryable_statuses: HashSet<u16>,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
    respect_robots_txt: bool,
    robots: RobotsCache,
    counters: FetchCounters,
}

fn quota_for(requests_per_second: f64) -> Quota {
    Duration::try_from_secs_f64(1.0 / requests_per_second)
        .ok()
        .and_then(Quota::with_period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
}

impl RateLimitedFetcher {
    pub fn new(config: &FetcherConfig, transport: Arc<dyn PageTransport>) -> Self {
        let mut user_agents: Vec<String> = config
            .user_agents
            .iter()
            .filter(|ua| !ua.trim().is_empty())
            .cloned()
            .collect();
        if user_agents.is_empty() {
            user_agents.push(FALLBACK_USER_AGENT.to_string());
        }

        Self {
            transport,
            limiter: Arc::new(RateLimiter::direct(quota_for(config.requests_per_second))),
            policy: BackoffPolicy::from_config(config),
            retryable_statuses: config.retryable_statuses.iter().copied().collect(),
            user_agents,
            next_agent: AtomicUsize::new(0),
            respect_robots_txt: config.respect_robots_txt,
            robots: RobotsCache::default(),
            counters: FetchCounters::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> FetchStats {
        self.counters.snapshot()
    }

    /// Round-robin over the header pool, once per `fetch` call.
    fn next_user_agent(&self) -> &str {
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        &self.user_agents[index]
    }

    async fn wait_for_slot(&self, url: &str, cancel: &CancellationToken) -> Result<(), FetchError> {
        tokio::select! {
            () = self.limiter.until_ready() => Ok(()),
            () = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        self.fetch_with_cancellation(url, &CancellationToken::new()).await
    }

    /// Fetch `url`; cancellation cuts both the limiter wait and backoff sleeps short.
    pub async fn fetch_with_cancellation(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<RawPage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let user_agent = self.next_user_agent();

        if self.respect_robots_txt {
            self.check_robots(&parsed, user_agent, cancel).await?;
        }

        let mut retry_delays = Vec::new();
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.wait_for_slot(url, cancel).await?;
            self.counters.record_request();

            let result = tokio::select! {
                result = self.transport.get(url, user_agent) => result,
                () = cancel.cancelled() => {
                    warn!("🛑 HTTP request cancelled for URL: {}", url);
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
            };

            let cause = match result {
                Ok(response) if (200..300).contains(&response.status) => {
                    debug!("Fetched {} in {} attempt(s)", url, attempts);
                    return Ok(RawPage {
                        url: url.to_string(),
                        body: response.body,
                        status: response.status,
                        fetched_at: Utc::now(),
                        attempts,
                        retry_delays,
                    });
                }
                Ok(response) => {
                    self.counters.record_failure();
                    if !self.retryable_statuses.contains(&response.status) {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status: response.status,
                            attempts,
                        });
                    }
                    format!("HTTP {}", response.status)
                }
                Err(error) => {
                    self.counters.record_failure();
                    if !error.is_retryable() {
                        return Err(FetchError::Transport {
                            url: url.to_string(),
                            cause: error,
                        });
                    }
                    error.to_string()
                }
            };

            if !self.policy.should_retry(attempts) {
                warn!(url, attempts, cause = %cause, "giving up after retries");
                return Err(FetchError::RetriesExhausted {
                    url: url.to_string(),
                    attempts,
                    last_cause: cause,
                });
            }

            let delay = self.policy.delay_for_retry(attempts);
            info!(url, attempt = attempts, delay = ?delay, cause = %cause, "retrying");
            retry_delays.push(delay);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(FetchError::Cancelled { url: url.to_string() }),
            }
        }
    }

    async fn check_robots(
        &self,
        url: &Url,
        user_agent: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let origin = url.origin().ascii_serialization();
        let rules = match self.robots.get(&origin) {
            Some(rules) => rules,
            None => {
                let rules = self.load_robots(&origin, user_agent, cancel).await?;
                self.robots.insert(&origin, rules)
            }
        };

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        if rules.is_allowed(&path) {
            Ok(())
        } else {
            warn!("robots.txt disallows {}", url);
            Err(FetchError::DisallowedByRobots { url: url.to_string() })
        }
    }

    /// A single attempt; an unreachable or non-2xx robots file allows everything.
    async fn load_robots(
        &self,
        origin: &str,
        user_agent: &str,
        cancel: &CancellationToken,
    ) -> Result<RobotsRules, FetchError> {
        let robots_url = format!("{origin}/robots.txt");
        self.wait_for_slot(&robots_url, cancel).await?;
        self.counters.record_request();

        let result = tokio::select! {
            result = self.transport.get(&robots_url, user_agent) => result,
            () = cancel.cancelled() => return Err(FetchError::Cancelled { url: robots_url }),
        };

        match result {
            Ok(response) if (200..300).contains(&response.status) => Ok(RobotsRules::parse(&response.body)),
            Ok(response) => {
                debug!("{} answered {}, assuming allowed", robots_url, response.status);
                Ok(RobotsRules::allow_all())
            }
            Err(error) => {
                self.counters.record_failure();
                warn!("Could not fetch {}: {}, assuming allowed", robots_url, error);
                Ok(RobotsRules::allow_all())
            }
        }
    }
}

/// URL of an entity's page: `key` appended as one percent-encoded path segment.
pub fn entity_url(base_url: &str, key: &str) -> Result<String, FetchError> {
    let invalid = |message: String| FetchError::InvalidUrl {
        url: base_url.to_string(),
        message,
    };
    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .push(key);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedTransport;

    fn fast_config() -> FetcherConfig {
        FetcherConfig {
            requests_per_second: 1000.0,
            base_delay_ms: 5,
            respect_robots_txt: false,
            user_agents: vec!["agent-a".into(), "agent-b".into()],
            ..FetcherConfig::default()
        }
    }

    #[test]
    fn entity_url_encodes_key_as_segment() {
        assert_eq!(
            entity_url("https://wiki.biligame.com/ys/", "琴").unwrap(),
            "https://wiki.biligame.com/ys/%E7%90%B4"
        );
        assert_eq!(
            entity_url("https://wiki.example/ys", "a/b").unwrap(),
            "https://wiki.example/ys/a%2Fb"
        );
        assert!(entity_url("not a url", "琴").is_err());
    }

    #[tokio::test]
    async fn header_rotates_per_call_not_per_retry() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("https://wiki.example/a", 503, "")
                .respond("https://wiki.example/a", 200, "ok")
                .respond("https://wiki.example/b", 200, "ok"),
        );
        let fetcher = RateLimitedFetcher::new(&fast_config(), transport.clone());

        fetcher.fetch("https://wiki.example/a").await.unwrap();
        fetcher.fetch("https://wiki.example/b").await.unwrap();

        let agents: Vec<String> = transport.requests().into_iter().map(|r| r.user_agent).collect();
        assert_eq!(agents, vec!["agent-a", "agent-a", "agent-b"]);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::new().respond("https://wiki.example/missing", 404, ""));
        let fetcher = RateLimitedFetcher::new(&fast_config(), transport.clone());

        let err = fetcher.fetch("https://wiki.example/missing").await.unwrap_err();

        assert_eq!(
            err,
            FetchError::Status {
                url: "https://wiki.example/missing".into(),
                status: 404,
                attempts: 1
            }
        );
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(fetcher.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn robots_disallow_is_terminal_and_cached() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("https://wiki.example/robots.txt", 200, "User-agent: *\nDisallow: /private")
                .respond("https://wiki.example/public", 200, "ok"),
        );
        let config = FetcherConfig {
            respect_robots_txt: true,
            ..fast_config()
        };
        let fetcher = RateLimitedFetcher::new(&config, transport.clone());

        let err = fetcher.fetch("https://wiki.example/private/page").await.unwrap_err();
        assert!(matches!(err, FetchError::DisallowedByRobots { .. }));
        assert!(fetcher.fetch("https://wiki.example/public").await.is_ok());

        let robots_hits = transport
            .requests()
            .iter()
            .filter(|r| r.url.ends_with("/robots.txt"))
            .count();
        assert_eq!(robots_hits, 1);
    }

    #[tokio::test]
    async fn robots_allow_opens_a_path_under_site_wide_disallow() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("https://wiki.example/robots.txt", 200, "User-agent: *\nDisallow: /\nAllow: /ys/\n")
                .respond("https://wiki.example/ys/%E7%90%B4", 200, "ok"),
        );
        let config = FetcherConfig {
            respect_robots_txt: true,
            ..fast_config()
        };
        let fetcher = RateLimitedFetcher::new(&config, transport.clone());

        let page = fetcher.fetch("https://wiki.example/ys/%E7%90%B4").await.unwrap();
        assert_eq!(page.body, "ok");
        let err = fetcher.fetch("https://wiki.example/index.php?title=x").await.unwrap_err();
        assert!(matches!(err, FetchError::DisallowedByRobots { .. }));
        assert_eq!(transport.request_count("https://wiki.example/index.php?title=x"), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let transport = Arc::new(ScriptedTransport::new().respond("https://wiki.example/slow", 503, ""));
        let config = FetcherConfig {
            base_delay_ms: 60_000,
            ..fast_config()
        };
        let fetcher = RateLimitedFetcher::new(&config, transport);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.fetch_with_cancellation("https://wiki.example/slow", &cancel),
        )
        .await
        .expect("backoff sleep should be cut short")
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
