//! HTML extraction
//!
//! [`StructuralExtractor`] turns a fetched page into strictly shaped
//! [`RawFields`]. The markup-specific knowledge lives in one
//! [`LandmarkStrategy`] per source layout, so a layout change touches a single
//! strategy, not the pipeline.

pub mod card_layout;
pub mod error;
pub mod infobox;
pub mod landmarks;
pub mod set_effect;

use scraper::Html;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::{EntityType, RawFields, RawPage};
use crate::infrastructure::config::ExtractorConfig;

pub use card_layout::CardLayoutStrategy;
pub use error::{ExtractError, ExtractResult};
pub use infobox::InfoboxTableStrategy;
pub use set_effect::ArtifactSetStrategy;

/// What the caller already knows about the page being extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHints {
    pub entity_type: EntityType,
    pub key: String,
}

impl EntityHints {
    pub fn new(entity_type: EntityType, key: impl Into<String>) -> Self {
        Self {
            entity_type,
            key: key.into(),
        }
    }
}

pub trait StructuralExtractor: Send + Sync {
    fn extract(&self, page: &RawPage, hints: &EntityHints) -> ExtractResult<RawFields>;

    fn supports(&self, entity_type: EntityType) -> bool;
}

/// Locates the landmarks of one source layout in a parsed document.
pub trait LandmarkStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, document: &Html, hints: &EntityHints) -> ExtractResult<RawFields>;
}

/// Dispatches to the strategy registered for the entity type.
pub struct HtmlExtractor {
    strategies: HashMap<EntityType, Box<dyn LandmarkStrategy>>,
}

impl HtmlExtractor {
    /// Characters use the infobox-table layout, weapons the card layout and
    /// artifact sets the set-effect layout.
    pub fn new(config: &ExtractorConfig) -> ExtractResult<Self> {
        Ok(Self {
            strategies: HashMap::new(),
        }
        .with_strategy(EntityType::Character, InfoboxTableStrategy::new(config)?)
        .with_strategy(EntityType::Weapon, CardLayoutStrategy::new(config)?)
        .with_strategy(EntityType::Artifact, ArtifactSetStrategy::new(config)?))
    }

    #[must_use]
    pub fn with_strategy(mut self, entity_type: EntityType, strategy: impl LandmarkStrategy + 'static) -> Self {
        self.strategies.insert(entity_type, Box::new(strategy));
        self
    }
}

impl StructuralExtractor for HtmlExtractor {
    fn extract(&self, page: &RawPage, hints: &EntityHints) -> ExtractResult<RawFields> {
        let strategy = self
            .strategies
            .get(&hints.entity_type)
            .ok_or(ExtractError::UnsupportedEntityType {
                entity_type: hints.entity_type,
            })?;

        let document = Html::parse_document(&page.body);
        debug!(
            key = %hints.key,
            strategy = strategy.name(),
            bytes = page.body.len(),
            "extracting {}",
            page.url
        );
        strategy.extract(&document, hints)
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        self.strategies.contains_key(&entity_type)
    }
}
