//! Extraction error types
//!
//! Every variant is terminal for the entity being extracted: static markup
//! does not change on retry, so none of them is retried.

use thiserror::Error;

use crate::domain::EntityType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no extraction strategy for entity type '{entity_type}'")]
    UnsupportedEntityType { entity_type: EntityType },

    #[error("invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("landmark '{landmark}' not found on page for '{key}'")]
    LandmarkMissing { landmark: String, key: String },

    #[error("leveled table for '{key}' has no row for level {level}")]
    ReferenceLevelMissing { level: String, key: String },

    #[error("malformed '{landmark}' for '{key}': {reason}")]
    MalformedTable {
        landmark: String,
        key: String,
        reason: String,
    },
}

impl ExtractError {
    pub fn landmark_missing(landmark: &str, key: &str) -> Self {
        Self::LandmarkMissing {
            landmark: landmark.to_string(),
            key: key.to_string(),
        }
    }

    pub fn malformed(landmark: &str, key: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTable {
            landmark: landmark.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
