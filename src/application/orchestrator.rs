//! # Sync Orchestrator
//!
//! Drives Fetch → Extract → Normalize → Reconcile over the configured key list
//! of one entity type. At most one run is active per orchestrator; a second
//! trigger is refused with [`OrchestratorError::Busy`] instead of being queued.
//!
//! Entities are processed with bounded concurrency. Every worker shares the one
//! fetcher, so the requests-per-second ceiling holds across all of them.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{
    EntityFailure, EntityOutcome, EntityRepository, EntityType, FailureStage, RunReport, RunStats, RunStatus,
};
use crate::infrastructure::config::{AppConfig, PipelineConfig, SourcesConfig};
use crate::infrastructure::{
    EntityHints, FetchStats, HtmlExtractor, PageTransport, RateLimitedFetcher, StructuralExtractor, TermNormalizer,
    entity_url,
};

use super::reconciler::{ReconcileOutcome, Reconciler};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("a {entity_type} run is already in progress")]
    Busy { entity_type: EntityType },

    #[error("no source or extraction strategy configured for {entity_type}")]
    Unsupported { entity_type: EntityType },

    #[error("pipeline setup failed: {message}")]
    Setup { message: String },

    #[error("run task aborted: {message}")]
    Aborted { message: String },
}

/// Snapshot served by the status interface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub current_entity_type: Option<EntityType>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub last_run_stats: Option<RunStats>,
    pub live_stats: Option<RunStats>,
    pub fetch_stats: FetchStats,
}

/// The stage implementations one orchestrator drives.
pub struct PipelineComponents {
    pub fetcher: Arc<RateLimitedFetcher>,
    pub extractor: Arc<dyn StructuralExtractor>,
    pub normalizer: Arc<TermNormalizer>,
    pub reconciler: Arc<Reconciler>,
    pub repository: Arc<dyn EntityRepository>,
}

impl PipelineComponents {
    /// The standard stack: HTML strategies, alias tables and the given seams.
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn PageTransport>,
        repository: Arc<dyn EntityRepository>,
    ) -> Result<Self, OrchestratorError> {
        let setup = |message: String| OrchestratorError::Setup { message };
        let extractor = HtmlExtractor::new(&config.extractor).map_err(|e| setup(e.to_string()))?;
        let normalizer =
            TermNormalizer::new(&config.normalizer.extra_aliases).map_err(|e| setup(e.to_string()))?;
        let reconciler = Reconciler::new(repository.clone())
            .with_overwrite_unmapped(config.reconcile.overwrite_with_unmapped);

        Ok(Self {
            fetcher: Arc::new(RateLimitedFetcher::new(&config.fetcher, transport)),
            extractor: Arc::new(extractor),
            normalizer: Arc::new(normalizer),
            reconciler: Arc::new(reconciler),
            repository,
        })
    }
}

struct ActiveRun {
    entity_type: EntityType,
    started_at: DateTime<Utc>,
    stats: RunStats,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RunState {
    active: Option<ActiveRun>,
    last_run: Option<RunReport>,
}

/// Work order for one run, fixed when the run starts.
struct RunPlan {
    entity_type: EntityType,
    base_url: String,
    keys: Vec<String>,
    cancel: CancellationToken,
}

/// Result of one entity: its outcome and how many normalization warnings it raised.
struct EntityResult {
    outcome: EntityOutcome,
    warnings: u32,
}

#[derive(Clone)]
pub struct Orchestrator {
    components: Arc<PipelineComponents>,
    sources: Arc<SourcesConfig>,
    pipeline: PipelineConfig,
    state: Arc<Mutex<RunState>>,
}

impl Orchestrator {
    pub fn new(components: PipelineComponents, sources: SourcesConfig, pipeline: PipelineConfig) -> Self {
        Self {
            components: Arc::new(components),
            sources: Arc::new(sources),
            pipeline,
            state: Arc::new(Mutex::new(RunState::default())),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn PageTransport>,
        repository: Arc<dyn EntityRepository>,
    ) -> Result<Self, OrchestratorError> {
        let components = PipelineComponents::from_config(config, transport, repository)?;
        Ok(Self::new(components, config.sources.clone(), config.pipeline.clone()))
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entity types that have both a source and an extraction strategy.
    pub fn supported_types(&self) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|entity_type| self.is_supported(*entity_type))
            .collect()
    }

    fn is_supported(&self, entity_type: EntityType) -> bool {
        self.sources.for_type(entity_type).is_some() && self.components.extractor.supports(entity_type)
    }

    /// Configured keys for `entity_type`, in run order.
    pub fn configured_keys(&self, entity_type: EntityType) -> Vec<String> {
        self.sources
            .for_type(entity_type)
            .map(|source| source.keys.clone())
            .unwrap_or_default()
    }

    /// Idle → Running, or `Busy` when a run is active.
    fn begin_run(&self, entity_type: EntityType, keys: Option<Vec<String>>) -> Result<RunPlan, OrchestratorError> {
        let source = self
            .sources
            .for_type(entity_type)
            .filter(|_| self.components.extractor.supports(entity_type))
            .ok_or(OrchestratorError::Unsupported { entity_type })?;
        let keys = unique_keys(keys.unwrap_or_else(|| source.keys.clone()));

        let mut state = self.lock_state();
        if let Some(active) = &state.active {
            return Err(OrchestratorError::Busy {
                entity_type: active.entity_type,
            });
        }

        let cancel = CancellationToken::new();
        state.active = Some(ActiveRun {
            entity_type,
            started_at: Utc::now(),
            stats: RunStats::new(u32::try_from(keys.len()).unwrap_or(u32::MAX)),
            cancel: cancel.clone(),
        });

        Ok(RunPlan {
            entity_type,
            base_url: source.base_url.clone(),
            keys,
            cancel,
        })
    }

    /// Start a run in the background over the configured keys (or `keys`).
    ///
    /// The run executes in its own task under a supervisor; if that task dies
    /// without finishing, the supervisor records the run as failed so the
    /// orchestrator returns to idle.
    pub fn trigger(
        &self,
        entity_type: EntityType,
        keys: Option<Vec<String>>,
    ) -> Result<JoinHandle<RunReport>, OrchestratorError> {
        let plan = self.begin_run(entity_type, keys)?;
        let this = self.clone();
        let span = info_span!("sync_run", entity_type = %entity_type);
        let worker = tokio::spawn(async move { this.execute(plan).await }.instrument(span));

        let supervisor = self.clone();
        Ok(tokio::spawn(async move {
            match worker.await {
                Ok(report) => report,
                Err(err) => {
                    error!("{} run task aborted: {}", entity_type, err);
                    supervisor.finish(RunStatus::Failed, Some(format!("run aborted: {err}")))
                }
            }
        }))
    }

    /// Start a run and wait for its report.
    pub async fn run(&self, entity_type: EntityType, keys: Option<Vec<String>>) -> Result<RunReport, OrchestratorError> {
        self.trigger(entity_type, keys)?
            .await
            .map_err(|e| OrchestratorError::Aborted { message: e.to_string() })
    }

    /// Stop starting new entities; returns false when no run is active.
    pub fn cancel(&self) -> bool {
        match &self.lock_state().active {
            Some(active) => {
                info!("cancellation requested for {} run", active.entity_type);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().active.is_some()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.lock_state().last_run.clone()
    }

    pub fn status(&self) -> OrchestratorStatus {
        let fetch_stats = self.components.fetcher.stats();
        let state = self.lock_state();
        let last_run = state.last_run.as_ref();
        OrchestratorStatus {
            is_running: state.active.is_some(),
            current_entity_type: state.active.as_ref().map(|run| run.entity_type),
            last_run_timestamp: last_run.map(|run| run.finished_at.unwrap_or(run.started_at)),
            last_run_stats: last_run.map(|run| run.stats.clone()),
            live_stats: state.active.as_ref().map(|run| run.stats.clone()),
            fetch_stats,
        }
    }

    async fn execute(&self, plan: RunPlan) -> RunReport {
        info!("starting {} run over {} key(s)", plan.entity_type, plan.keys.len());

        if let Err(err) = self.components.repository.ping().await {
            error!("storage unreachable, failing run: {}", err);
            return self.finish(RunStatus::Failed, Some(format!("storage unreachable: {err}")));
        }

        let concurrency = self.pipeline.concurrency.max(1);
        let plan = &plan;
        let mut results = stream::iter(plan.keys.clone())
            .map(move |key| async move { self.process_entity(plan, &key).await })
            .buffer_unordered(concurrency);

        // Single aggregation point: only this loop mutates the run's stats.
        while let Some(result) = results.next().await {
            let Some(result) = result else { continue };
            let mut state = self.lock_state();
            if let Some(active) = state.active.as_mut() {
                active
                    .stats
                    .record(result.outcome, result.warnings, self.pipeline.max_error_details);
            }
        }

        let status = if plan.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        self.finish(status, None)
    }

    /// Running → terminal; the report becomes `last_run` and the state returns to idle.
    fn finish(&self, status: RunStatus, fault: Option<String>) -> RunReport {
        let mut state = self.lock_state();
        let report = match state.active.take() {
            Some(mut active) => {
                active.stats.finish(status, fault);
                RunReport {
                    entity_type: active.entity_type,
                    started_at: active.started_at,
                    finished_at: Some(Utc::now()),
                    stats: active.stats,
                }
            }
            None => {
                let mut stats = RunStats::default();
                stats.finish(status, fault);
                RunReport {
                    entity_type: EntityType::Character,
                    started_at: Utc::now(),
                    finished_at: Some(Utc::now()),
                    stats,
                }
            }
        };

        let stats = &report.stats;
        info!(
            status = ?stats.status,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            errored = stats.errored,
            warnings = stats.normalize_warnings,
            "{} run finished",
            report.entity_type
        );
        state.last_run = Some(report.clone());
        report
    }

    /// One key through every stage. `None` when cancellation stopped it before
    /// it produced an outcome.
    async fn process_entity(&self, plan: &RunPlan, key: &str) -> Option<EntityResult> {
        if plan.cancel.is_cancelled() {
            return None;
        }
        let failed = |stage: FailureStage, message: String| {
            warn!(key, %stage, "entity failed: {}", message);
            Some(EntityResult {
                outcome: EntityOutcome::Failed(EntityFailure {
                    key: key.to_string(),
                    stage,
                    message,
                }),
                warnings: 0,
            })
        };
        let components = &self.components;

        let url = match entity_url(&plan.base_url, key) {
            Ok(url) => url,
            Err(err) => return failed(FailureStage::Fetch, err.to_string()),
        };
        let page = match components.fetcher.fetch_with_cancellation(&url, &plan.cancel).await {
            Ok(page) => page,
            Err(err) if err.is_cancelled() => return None,
            Err(err) => return failed(FailureStage::Fetch, err.to_string()),
        };

        let hints = EntityHints::new(plan.entity_type, key);
        let raw = match components.extractor.extract(&page, &hints) {
            Ok(raw) => raw,
            Err(err) => return failed(FailureStage::Extract, err.to_string()),
        };

        let normalized = match components.normalizer.normalize(&raw) {
            Ok(normalized) => normalized,
            Err(err) => return failed(FailureStage::Normalize, err.to_string()),
        };
        for warning in &normalized.warnings {
            warn!(key, "normalization warning: {}", warning);
        }
        let warnings = u32::try_from(normalized.warnings.len()).unwrap_or(u32::MAX);

        let outcome = components.reconciler.reconcile(&normalized.record).await;
        match outcome {
            ReconcileOutcome::Errored(err) => {
                let mut result = failed(FailureStage::Reconcile, err.to_string())?;
                result.warnings = warnings;
                Some(result)
            }
            other => other.counter().map(|outcome| EntityResult { outcome, warnings }),
        }
    }
}

/// Drops repeated keys, keeping the first occurrence and the run order.
fn unique_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let total = keys.len();
    let keys: Vec<String> = keys
        .into_iter()
        .filter(|key| seen.insert(key.trim().to_string()))
        .collect();
    if keys.len() < total {
        debug!(dropped = total - keys.len(), "ignoring duplicate keys");
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::SqliteEntityRepository;
    use crate::test_utils::{FlakyRepository, ScriptedTransport, TestDatabase, fixture, test_config, test_url};

    async fn orchestrator(transport: ScriptedTransport) -> (TestDatabase, Orchestrator) {
        let db = TestDatabase::new().await.unwrap();
        let repository = Arc::new(SqliteEntityRepository::new(db.pool()));
        let orchestrator =
            Orchestrator::from_config(&test_config(&["琴"]), Arc::new(transport), repository).unwrap();
        (db, orchestrator)
    }

    #[tokio::test]
    async fn unsupported_type_is_refused_before_starting() {
        let (_db, orchestrator) = orchestrator(ScriptedTransport::new()).await;

        let err = orchestrator.trigger(EntityType::Monster, None).unwrap_err();

        assert_eq!(err, OrchestratorError::Unsupported { entity_type: EntityType::Monster });
        assert!(!orchestrator.is_running());
        assert_eq!(
            orchestrator.supported_types(),
            vec![EntityType::Character, EntityType::Weapon, EntityType::Artifact]
        );
    }

    #[tokio::test]
    async fn status_reflects_finished_run() {
        let transport = ScriptedTransport::new().respond(
            "https://wiki.example/ys/%E7%90%B4",
            200,
            &fixture("character_jean.html").unwrap(),
        );
        let (_db, orchestrator) = orchestrator(transport).await;

        let report = orchestrator.run(EntityType::Character, None).await.unwrap();
        let status = orchestrator.status();

        assert_eq!(report.stats.status, RunStatus::Completed);
        assert_eq!(report.stats.created, 1);
        assert!(!status.is_running);
        assert_eq!(status.current_entity_type, None);
        assert_eq!(status.last_run_timestamp, report.finished_at);
        assert_eq!(status.last_run_stats, Some(report.stats));
        assert_eq!(status.fetch_stats.total_requests, 1);
    }

    #[tokio::test]
    async fn unreachable_storage_fails_the_run() {
        let db = TestDatabase::new().await.unwrap();
        let repository = Arc::new(SqliteEntityRepository::new(db.pool()));
        db.pool().close().await;
        let orchestrator =
            Orchestrator::from_config(&test_config(&["琴"]), Arc::new(ScriptedTransport::new()), repository)
                .unwrap();

        let report = orchestrator.run(EntityType::Character, None).await.unwrap();

        assert_eq!(report.stats.status, RunStatus::Failed);
        assert_eq!(report.stats.processed(), 0);
        assert!(report.stats.error_summary.unwrap().starts_with("storage unreachable"));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn cancel_without_run_is_a_no_op() {
        let (_db, orchestrator) = orchestrator(ScriptedTransport::new()).await;
        assert!(!orchestrator.cancel());
    }

    #[tokio::test]
    async fn triggered_run_reports_through_its_handle() {
        let transport = ScriptedTransport::new().respond(&test_url("琴"), 200, &fixture("character_jean.html").unwrap());
        let (_db, orchestrator) = orchestrator(transport).await;

        let handle = orchestrator.trigger(EntityType::Character, None).unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.entity_type, EntityType::Character);
        assert_eq!(report.stats.status, RunStatus::Completed);
        assert_eq!(report.stats.created, 1);
        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.last_report().map(|r| r.stats), Some(report.stats));
    }

    #[tokio::test]
    async fn panicking_run_is_recorded_as_failed_and_frees_the_orchestrator() {
        let db = TestDatabase::new().await.unwrap();
        let inner: Arc<dyn EntityRepository> = Arc::new(SqliteEntityRepository::new(db.pool()));
        let repository = Arc::new(FlakyRepository::new(inner).panic_on_lookup());
        let transport = ScriptedTransport::new().respond(&test_url("琴"), 200, &fixture("character_jean.html").unwrap());
        let orchestrator = Orchestrator::from_config(&test_config(&["琴"]), Arc::new(transport), repository).unwrap();

        let report = orchestrator.run(EntityType::Character, None).await.unwrap();

        assert_eq!(report.stats.status, RunStatus::Failed);
        assert!(report.stats.error_summary.unwrap().starts_with("run aborted"));
        assert!(!orchestrator.is_running());
        assert_eq!(
            orchestrator.status().last_run_stats.map(|stats| stats.status),
            Some(RunStatus::Failed)
        );
        let retry = orchestrator.trigger(EntityType::Character, None);
        assert!(retry.is_ok(), "a new run is accepted after the aborted one");
        retry.unwrap().await.unwrap();
    }

    #[test]
    fn duplicate_keys_keep_first_occurrence_order() {
        let keys = ["琴", "迪卢克", "琴", " 迪卢克 ", "温迪"].map(String::from).to_vec();
        assert_eq!(unique_keys(keys), vec!["琴", "迪卢克", "温迪"]);
    }
}
