//! Application layer
//!
//! Runs the pipeline: per-record reconciliation, the single-flight
//! orchestrator and the trigger/status boundary in front of it.

pub mod orchestrator;
pub mod reconciler;
pub mod scraper_api;

pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorStatus, PipelineComponents};
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler, diff_fields};
pub use scraper_api::{CancelResponse, ConfigView, ScraperApi, TriggerError, TriggerResponse};
