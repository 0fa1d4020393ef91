//! Trigger / status / config boundary
//!
//! Transport-agnostic handlers for `POST /scraper/{entity-type}/trigger`,
//! `GET /scraper/status` and the read-only configuration view. Responses are
//! serde types; each error carries the HTTP status a web layer should use.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::{EntityType, UnknownEntityType};
use crate::infrastructure::config::FetcherConfig;

use super::orchestrator::{Orchestrator, OrchestratorError, OrchestratorStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    /// Always `"started"`.
    pub status: String,
    pub entity_type: EntityType,
    pub keys: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Read-only configuration exposed at the trigger boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub requests_per_second: f64,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub respect_robots_txt: bool,
}

impl From<&FetcherConfig> for ConfigView {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            requests_per_second: config.requests_per_second,
            max_retries: config.max_retries,
            timeout_seconds: config.timeout_seconds,
            respect_robots_txt: config.respect_robots_txt,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error(transparent)]
    UnknownType(#[from] UnknownEntityType),

    #[error("{entity_type} cannot be scraped: no source configured")]
    Unsupported { entity_type: EntityType },

    #[error("a {running} run is already in progress")]
    Busy { running: EntityType },

    #[error("trigger failed: {message}")]
    Internal { message: String },
}

impl TriggerError {
    /// Status code for an HTTP front end; `Busy` is the conflict indicator.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::UnknownType(_) => 404,
            Self::Unsupported { .. } => 422,
            Self::Busy { .. } => 409,
            Self::Internal { .. } => 500,
        }
    }
}

impl From<OrchestratorError> for TriggerError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Busy { entity_type } => Self::Busy { running: entity_type },
            OrchestratorError::Unsupported { entity_type } => Self::Unsupported { entity_type },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct ScraperApi {
    orchestrator: Orchestrator,
    config: ConfigView,
}

impl ScraperApi {
    pub fn new(orchestrator: Orchestrator, fetcher: &FetcherConfig) -> Self {
        Self {
            orchestrator,
            config: ConfigView::from(fetcher),
        }
    }

    /// `POST /scraper/{entity-type}/trigger`; the run continues in the background.
    pub fn trigger(&self, entity_type: &str) -> Result<TriggerResponse, TriggerError> {
        let entity_type: EntityType = entity_type.parse()?;
        let keys = self.orchestrator.configured_keys(entity_type).len();
        drop(self.orchestrator.trigger(entity_type, None)?);

        info!("accepted trigger for {} ({} keys)", entity_type, keys);
        Ok(TriggerResponse {
            status: "started".to_string(),
            entity_type,
            keys,
        })
    }

    /// `GET /scraper/status`
    pub fn status(&self) -> OrchestratorStatus {
        self.orchestrator.status()
    }

    pub fn cancel(&self) -> CancelResponse {
        CancelResponse {
            cancelled: self.orchestrator.cancel(),
        }
    }

    pub fn config_view(&self) -> ConfigView {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::SqliteEntityRepository;
    use crate::test_utils::{ScriptedTransport, TestDatabase, test_config};
    use std::sync::Arc;
    use std::time::Duration;

    async fn api(transport: ScriptedTransport) -> (TestDatabase, ScraperApi) {
        let db = TestDatabase::new().await.unwrap();
        let config = test_config(&["琴"]);
        let repository = Arc::new(SqliteEntityRepository::new(db.pool()));
        let orchestrator = Orchestrator::from_config(&config, Arc::new(transport), repository).unwrap();
        (db, ScraperApi::new(orchestrator, &config.fetcher))
    }

    #[tokio::test]
    async fn trigger_rejects_unknown_and_unsupported_types() {
        let (_db, api) = api(ScriptedTransport::new()).await;

        let unknown = api.trigger("vehicles").unwrap_err();
        assert_eq!(unknown.status_code(), 404);

        let unsupported = api.trigger("monster").unwrap_err();
        assert_eq!(
            unsupported,
            TriggerError::Unsupported {
                entity_type: EntityType::Monster
            }
        );
        assert_eq!(unsupported.status_code(), 422);
    }

    #[tokio::test]
    async fn second_trigger_while_running_is_a_conflict() {
        let transport = ScriptedTransport::new()
            .with_latency(Duration::from_millis(300))
            .respond("https://wiki.example/ys/%E7%90%B4", 404, "");
        let (_db, api) = api(transport).await;

        let started = api.trigger("characters").unwrap();
        assert_eq!(started.status, "started");
        assert_eq!(started.keys, 1);

        let busy = api.trigger("weapon").unwrap_err();
        assert_eq!(busy, TriggerError::Busy { running: EntityType::Character });
        assert_eq!(busy.status_code(), 409);
        assert!(api.status().is_running);
    }

    #[tokio::test]
    async fn config_view_is_the_fetcher_subset() {
        let (_db, api) = api(ScriptedTransport::new()).await;
        let view = serde_json::to_value(api.config_view()).unwrap();

        assert_eq!(view["maxRetries"], 3);
        assert_eq!(view["respectRobotsTxt"], false);
        assert!(view.get("requestsPerSecond").is_some());
        assert!(view.get("timeoutSeconds").is_some());
    }
}
