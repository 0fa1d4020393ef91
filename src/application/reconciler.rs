//! Incremental reconciliation of candidates against storage
//!
//! A candidate is created when its key is unknown, applied as a partial update
//! when any tracked field differs, and skipped otherwise. Re-running against
//! unchanged source data therefore never writes.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{
    CandidateRecord, EntityFields, EntityOutcome, EntityRepository, FieldChange, FieldDiff, FieldValue,
    StorageError, StoredRecord, TrackedField,
};

const REAL_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("lookup of '{key}' failed: {source}")]
    Lookup {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("creating '{key}' failed: {source}")]
    Create {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("updating '{key}' failed: {source}")]
    Update {
        key: String,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created(StoredRecord),
    Updated { record: StoredRecord, diff: FieldDiff },
    Skipped(StoredRecord),
    Errored(ReconcileError),
}

impl ReconcileOutcome {
    #[must_use]
    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    /// Counter bucket; errors are itemised by the caller, which knows the stage.
    #[must_use]
    pub fn counter(&self) -> Option<EntityOutcome> {
        match self {
            Self::Created(_) => Some(EntityOutcome::Created),
            Self::Updated { .. } => Some(EntityOutcome::Updated),
            Self::Skipped(_) => Some(EntityOutcome::Skipped),
            Self::Errored(_) => None,
        }
    }
}

pub struct Reconciler {
    repository: Arc<dyn EntityRepository>,
    overwrite_with_unmapped: bool,
}

impl Reconciler {
    pub fn new(repository: Arc<dyn EntityRepository>) -> Self {
        Self {
            repository,
            overwrite_with_unmapped: false,
        }
    }

    #[must_use]
    pub fn with_overwrite_unmapped(mut self, enabled: bool) -> Self {
        self.overwrite_with_unmapped = enabled;
        self
    }

    pub async fn reconcile(&self, candidate: &CandidateRecord) -> ReconcileOutcome {
        match self.try_reconcile(candidate).await {
            Ok(outcome) => outcome,
            Err(err) => ReconcileOutcome::Errored(err),
        }
    }

    async fn try_reconcile(&self, candidate: &CandidateRecord) -> Result<ReconcileOutcome, ReconcileError> {
        let key = candidate.key.to_string();
        let existing = self
            .repository
            .find_by_key(candidate.entity_type, &candidate.key)
            .await
            .map_err(|source| ReconcileError::Lookup {
                key: key.clone(),
                source,
            })?;

        let Some(stored) = existing else {
            let record = self
                .repository
                .create(candidate)
                .await
                .map_err(|source| ReconcileError::Create { key, source })?;
            info!(key = %candidate.key, id = record.id, "created {} record", candidate.entity_type);
            return Ok(ReconcileOutcome::Created(record));
        };

        let diff = diff_fields(&stored.fields, &candidate.fields, self.overwrite_with_unmapped);
        if diff.is_empty() {
            debug!(key = %candidate.key, "unchanged, skipping");
            return Ok(ReconcileOutcome::Skipped(stored));
        }

        let record = self
            .repository
            .update(&stored, &diff)
            .await
            .map_err(|source| ReconcileError::Update { key, source })?;
        info!(
            key = %candidate.key,
            fields = ?diff.fields().map(TrackedField::column).collect::<Vec<_>>(),
            "updated {} record",
            candidate.entity_type
        );
        Ok(ReconcileOutcome::Updated { record, diff })
    }
}

/// Field-level diff of `candidate` against `stored`.
///
/// Fields the candidate does not carry are left alone. An unmapped
/// classification only replaces a mapped stored value when
/// `overwrite_with_unmapped` is set.
pub fn diff_fields(stored: &EntityFields, candidate: &EntityFields, overwrite_with_unmapped: bool) -> FieldDiff {
    let mut diff = FieldDiff::default();

    for field in TrackedField::ALL {
        let Some(value) = candidate.value(field) else {
            continue;
        };
        let previous = stored.value(field);
        if previous.as_ref().is_some_and(|prev| same_value(prev, &value)) {
            continue;
        }

        let downgrades_mapped = value.is_unmapped_marker()
            && previous.as_ref().is_some_and(|prev| !prev.is_unmapped_marker());
        if downgrades_mapped && !overwrite_with_unmapped {
            debug!(field = field.column(), "keeping mapped value over unmapped candidate");
            continue;
        }

        diff.push(FieldChange { field, previous, value });
    }

    diff
}

fn same_value(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Real(x), FieldValue::Real(y)) => (x - y).abs() <= REAL_TOLERANCE,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Canonical, Element, EntityKey, EntityType, Region};
    use crate::infrastructure::SqliteEntityRepository;
    use crate::test_utils::{FlakyRepository, TestDatabase};

    fn example(attack: f64) -> CandidateRecord {
        CandidateRecord {
            entity_type: EntityType::Character,
            key: EntityKey::new("Example").unwrap(),
            fields: EntityFields {
                name: Some("Example".into()),
                rarity: Some(5),
                element: Some(Canonical::Mapped(Element::Anemo)),
                health: Some(14695.0),
                attack: Some(attack),
                defense: Some(769.0),
                ..EntityFields::default()
            },
        }
    }

    async fn reconciler() -> (TestDatabase, Reconciler) {
        let db = TestDatabase::new().await.unwrap();
        let repository = Arc::new(SqliteEntityRepository::new(db.pool()));
        (db, Reconciler::new(repository))
    }

    #[tokio::test]
    async fn create_then_skip_is_idempotent() {
        let (_db, reconciler) = reconciler().await;

        let first = reconciler.reconcile(&example(239.0)).await;
        let second = reconciler.reconcile(&example(239.0)).await;

        assert!(matches!(first, ReconcileOutcome::Created(_)));
        let ReconcileOutcome::Skipped(stored) = second else {
            panic!("expected skip, got {second:?}");
        };
        assert_eq!(stored.created_at, stored.updated_at);
    }

    #[tokio::test]
    async fn single_field_change_updates_only_that_field() {
        let (_db, reconciler) = reconciler().await;
        let ReconcileOutcome::Created(original) = reconciler.reconcile(&example(239.0)).await else {
            panic!("expected create");
        };

        let outcome = reconciler.reconcile(&example(250.0)).await;

        let ReconcileOutcome::Updated { record, diff } = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(diff.fields().collect::<Vec<_>>(), vec![TrackedField::Attack]);
        assert_eq!(record.fields.attack, Some(250.0));
        assert_eq!(
            EntityFields {
                attack: Some(239.0),
                ..record.fields.clone()
            },
            original.fields
        );
    }

    #[tokio::test]
    async fn storage_failure_is_caught_per_record() {
        let db = TestDatabase::new().await.unwrap();
        let inner = Arc::new(SqliteEntityRepository::new(db.pool()));
        let repository = Arc::new(FlakyRepository::new(inner).fail_writes_for("Example"));
        let reconciler = Reconciler::new(repository);

        let outcome = reconciler.reconcile(&example(239.0)).await;

        assert!(matches!(
            outcome,
            ReconcileOutcome::Errored(ReconcileError::Create { ref key, .. }) if key == "Example"
        ));
        assert!(outcome.counter().is_none());
    }

    #[test]
    fn absent_candidate_fields_are_preserved() {
        let stored = example(239.0).fields;
        let candidate = EntityFields {
            attack: Some(239.0),
            ..EntityFields::default()
        };
        assert!(diff_fields(&stored, &candidate, false).is_empty());
    }

    #[test]
    fn unmapped_candidate_does_not_replace_mapped_value_by_default() {
        let stored = EntityFields {
            region: Some(Canonical::Mapped(Region::Mondstadt)),
            ..EntityFields::default()
        };
        let candidate = EntityFields {
            region: Some(Canonical::Unmapped("蒙德城".into())),
            ..EntityFields::default()
        };

        assert!(diff_fields(&stored, &candidate, false).is_empty());
        let forced = diff_fields(&stored, &candidate, true);
        assert_eq!(forced.fields().collect::<Vec<_>>(), vec![TrackedField::Region]);
    }

    #[test]
    fn unmapped_candidate_fills_empty_field() {
        let candidate = EntityFields {
            region: Some(Canonical::Unmapped("坎瑞亚".into())),
            ..EntityFields::default()
        };
        let diff = diff_fields(&EntityFields::default(), &candidate, false);
        let change = diff.iter().next().unwrap();
        assert_eq!(change.previous, None);
        assert_eq!(change.value, FieldValue::Text("unmapped:坎瑞亚".into()));
    }
}
