//! Run statistics reported through the status interface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::entity::EntityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Pipeline stage an entity failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Extract,
    Normalize,
    Reconcile,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Normalize => "normalize",
            Self::Reconcile => "reconcile",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub key: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Terminal result of one entity within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Created,
    Updated,
    Skipped,
    Failed(EntityFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total: u32,
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errored: u32,
    pub normalize_warnings: u32,
    pub status: RunStatus,
    pub error_summary: Option<String>,
    pub failures: Vec<EntityFailure>,
    #[serde(skip)]
    failures_by_stage: BTreeMap<FailureStage, u32>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RunStats {
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            total,
            created: 0,
            updated: 0,
            skipped: 0,
            errored: 0,
            normalize_warnings: 0,
            status: RunStatus::Running,
            error_summary: None,
            failures: Vec::new(),
            failures_by_stage: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn processed(&self) -> u32 {
        self.created + self.updated + self.skipped + self.errored
    }

    /// Count one entity's outcome; at most `max_failures` failures are itemised.
    pub fn record(&mut self, outcome: EntityOutcome, warnings: u32, max_failures: usize) {
        self.normalize_warnings += warnings;
        match outcome {
            EntityOutcome::Created => self.created += 1,
            EntityOutcome::Updated => self.updated += 1,
            EntityOutcome::Skipped => self.skipped += 1,
            EntityOutcome::Failed(failure) => {
                self.errored += 1;
                *self.failures_by_stage.entry(failure.stage).or_default() += 1;
                if self.failures.len() < max_failures {
                    self.failures.push(failure);
                }
            }
        }
    }

    /// Freeze the stats with a terminal status.
    pub fn finish(&mut self, status: RunStatus, fault: Option<String>) {
        self.status = status;
        self.error_summary = fault.or_else(|| self.stage_summary());
    }

    fn stage_summary(&self) -> Option<String> {
        if self.errored == 0 {
            return None;
        }
        let per_stage = self
            .failures_by_stage
            .iter()
            .map(|(stage, count)| format!("{stage}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "{} of {} entities failed ({per_stage})",
            self.errored,
            self.processed()
        ))
    }
}

/// A run as seen by the status interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub entity_type: EntityType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
}
