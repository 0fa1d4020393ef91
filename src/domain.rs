//! Domain layer - core data model of the sync pipeline
//!
//! Contains the entity identity types, the canonical vocabularies that
//! scraped terms are resolved into, the records that flow between the
//! pipeline stages and the storage contract consumed by the reconciler.

pub mod canonical;
pub mod entity;
pub mod records;
pub mod repositories;
pub mod run_stats;

pub use canonical::{Canonical, CanonicalName, Element, Region, StatKind, WeaponCategory};
pub use entity::{EntityKey, EntityKeyError, EntityType, UnknownEntityType};
pub use records::{
    AscensionCell, CandidateRecord, EntityFields, FieldChange, FieldDiff,
    FieldValue, LabeledCell, LeveledRow, RawFields, RawPage, StoredRecord, TrackedField,
};
pub use repositories::{EntityRepository, StorageError};
pub use run_stats::{EntityFailure, EntityOutcome, FailureStage, RunReport, RunStats, RunStatus};
