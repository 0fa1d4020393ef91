//! Test utilities for genshin-data-sync
//!
//! In-process stand-ins for the two external seams (page transport and
//! storage) plus fixture and configuration helpers, so unit and integration
//! tests run without network access or an on-disk database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::domain::{CandidateRecord, EntityKey, EntityRepository, EntityType, FieldDiff, StorageError, StoredRecord};
use crate::infrastructure::config::{AppConfig, FetcherConfig, LoggingConfig, SourceConfig, SourcesConfig};
use crate::infrastructure::{DatabaseConnection, PageTransport, TransportError, TransportResponse};

pub const TEST_BASE_URL: &str = "https://wiki.example/ys/";

/// Test database configuration
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    /// A fresh, migrated in-memory database per call.
    pub async fn new() -> Result<Self> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(Self { connection: db })
    }

    pub fn pool(&self) -> sqlx::Pool<sqlx::Sqlite> {
        self.connection.pool().clone()
    }
}

/// Contents of `tests/fixtures/<name>`.
pub fn fixture(name: &str) -> Result<String> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path).with_context(|| format!("reading fixture {}", path.display()))
}

/// Configuration pointing every source at [`TEST_BASE_URL`], with a fast
/// fetcher (no robots lookup, millisecond backoff).
pub fn test_config(character_keys: &[&str]) -> AppConfig {
    AppConfig {
        fetcher: FetcherConfig {
            requests_per_second: 1000.0,
            base_delay_ms: 5,
            respect_robots_txt: false,
            ..FetcherConfig::default()
        },
        sources: SourcesConfig {
            character: Some(SourceConfig {
                base_url: TEST_BASE_URL.to_string(),
                keys: character_keys.iter().map(ToString::to_string).collect(),
            }),
            weapon: Some(SourceConfig {
                base_url: TEST_BASE_URL.to_string(),
                keys: Vec::new(),
            }),
            artifact: Some(SourceConfig {
                base_url: TEST_BASE_URL.to_string(),
                keys: Vec::new(),
            }),
        },
        logging: LoggingConfig {
            console_output: false,
            ..LoggingConfig::default()
        },
        ..AppConfig::default()
    }
}

/// Source URL of `key` under [`TEST_BASE_URL`].
pub fn test_url(key: &str) -> String {
    crate::infrastructure::entity_url(TEST_BASE_URL, key).unwrap_or_else(|_| format!("{TEST_BASE_URL}{key}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub user_agent: String,
}

type Scripted = Result<TransportResponse, TransportError>;

/// Transport answering from per-URL scripts.
///
/// Responses for a URL are consumed in order and the last one repeats.
/// Unscripted URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, url: &str, scripted: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    #[must_use]
    pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
        self.push(
            url,
            Ok(TransportResponse {
                status,
                body: body.to_string(),
            }),
        )
    }

    #[must_use]
    pub fn fail(self, url: &str, error: TransportError) -> Self {
        self.push(url, Err(error))
    }

    /// Every request sleeps this long before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }

    fn next_response(&self, url: &str) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = scripts.get_mut(url) else {
            return Ok(TransportResponse {
                status: 404,
                body: String::new(),
            });
        };
        if queue.len() > 1 {
            if let Some(front) = queue.pop_front() {
                return front;
            }
        }
        queue.front().cloned().unwrap_or(Ok(TransportResponse {
            status: 404,
            body: String::new(),
        }))
    }
}

#[async_trait]
impl PageTransport for ScriptedTransport {
    async fn get(&self, url: &str, user_agent: &str) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                url: url.to_string(),
                user_agent: user_agent.to_string(),
            });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next_response(url)
    }
}

/// Repository wrapper that injects storage faults.
pub struct FlakyRepository {
    inner: Arc<dyn EntityRepository>,
    failing_keys: HashSet<String>,
    unreachable: bool,
    panic_on_lookup: bool,
}

impl FlakyRepository {
    pub fn new(inner: Arc<dyn EntityRepository>) -> Self {
        Self {
            inner,
            failing_keys: HashSet::new(),
            unreachable: false,
            panic_on_lookup: false,
        }
    }

    /// Creates and updates of `key` fail with an I/O error.
    #[must_use]
    pub fn fail_writes_for(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    /// `ping` fails, as if the database could not be reached.
    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// `find_by_key` panics, taking the calling task down with it.
    #[must_use]
    pub fn panic_on_lookup(mut self) -> Self {
        self.panic_on_lookup = true;
        self
    }

    fn check_write(&self, key: &EntityKey) -> Result<(), StorageError> {
        if self.failing_keys.contains(key.as_str()) {
            return Err(StorageError::Io {
                message: format!("disk I/O error writing {key}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for FlakyRepository {
    async fn ping(&self) -> Result<(), StorageError> {
        if self.unreachable {
            return Err(StorageError::Unavailable {
                message: "connection refused".to_string(),
            });
        }
        self.inner.ping().await
    }

    async fn find_by_key(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<StoredRecord>, StorageError> {
        assert!(!self.panic_on_lookup, "lookup of {key} panicked");
        self.inner.find_by_key(entity_type, key).await
    }

    async fn create(&self, candidate: &CandidateRecord) -> Result<StoredRecord, StorageError> {
        self.check_write(&candidate.key)?;
        self.inner.create(candidate).await
    }

    async fn update(&self, existing: &StoredRecord, diff: &FieldDiff) -> Result<StoredRecord, StorageError> {
        self.check_write(&existing.key)?;
        self.inner.update(existing, diff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multiple_databases_are_isolated() {
        let db1 = TestDatabase::new().await.unwrap();
        let db2 = TestDatabase::new().await.unwrap();

        sqlx::query("INSERT INTO entities (entity_type, entity_key, created_at, updated_at) VALUES ('character', 'a', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')")
            .execute(&db1.pool())
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&db2.pool())
            .await
            .unwrap();

        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn scripted_responses_are_consumed_then_repeat() {
        let transport = ScriptedTransport::new()
            .respond("u", 503, "")
            .respond("u", 200, "ok");

        let statuses: Vec<u16> = [
            transport.get("u", "a").await.unwrap().status,
            transport.get("u", "a").await.unwrap().status,
            transport.get("u", "a").await.unwrap().status,
            transport.get("other", "a").await.unwrap().status,
        ]
        .into();

        assert_eq!(statuses, vec![503, 200, 200, 404]);
        assert_eq!(transport.request_count("u"), 3);
    }

    #[test]
    fn fixtures_are_readable() {
        assert!(fixture("character_example.html").unwrap().contains("Example"));
        assert!(fixture("missing.html").is_err());
    }
}
