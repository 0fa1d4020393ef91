//! Storage contract consumed by the reconciler
//!
//! The reconciler only ever reads and writes records through this narrow
//! interface; the persisted schema lives behind it in the infrastructure layer.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entity::{EntityKey, EntityType};
use crate::domain::records::{CandidateRecord, FieldDiff, StoredRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("constraint violated: {message}")]
    Constraint { message: String },

    #[error("record {entity_type}/{key} not found")]
    NotFound { entity_type: EntityType, key: String },

    #[error("stored column '{column}' holds an unreadable value: {message}")]
    Corrupt { column: String, message: String },

    #[error("storage I/O failed: {message}")]
    Io { message: String },
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Liveness check run once before a batch starts.
    async fn ping(&self) -> Result<(), StorageError>;

    async fn find_by_key(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<StoredRecord>, StorageError>;

    async fn create(&self, candidate: &CandidateRecord) -> Result<StoredRecord, StorageError>;

    /// Applies `diff` as a partial update; columns absent from the diff are kept.
    async fn update(&self, existing: &StoredRecord, diff: &FieldDiff) -> Result<StoredRecord, StorageError>;
}
