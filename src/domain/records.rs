//! Records flowing through the pipeline
//!
//! `RawPage` (fetcher) -> `RawFields` (extractor) -> `CandidateRecord`
//! (normalizer) -> `StoredRecord` (storage). Candidates and stored records
//! share one attribute set, [`EntityFields`], so the reconciler can diff them
//! field by field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::canonical::{Canonical, Element, Region, StatKind, WeaponCategory};
use super::entity::{EntityKey, EntityType};

/// Fetched markup plus where and when it came from.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub body: String,
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
    /// Number of attempts the fetch took (1 when the first request succeeded).
    pub attempts: u32,
    /// Backoff delays slept between attempts, in order.
    pub retry_delays: Vec<Duration>,
}

impl RawPage {
    /// A page that did not come off the network (offline extraction, tests).
    pub fn from_markup(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            status: 200,
            fetched_at: Utc::now(),
            attempts: 1,
            retry_delays: Vec::new(),
        }
    }
}

/// One `label -> value` pair from a basic information block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledCell {
    pub label: String,
    pub value: String,
    /// `alt` texts of images inside the value cell (star icons, element icons).
    pub image_alts: Vec<String>,
}

/// Secondary stat column of the leveled table: header label and cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AscensionCell {
    pub label: String,
    pub value: f64,
}

/// The leveled-attribute row matching the reference level. Layouts without
/// a leveled table (artifact sets) leave it at its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeveledRow {
    pub level: String,
    pub health: Option<f64>,
    pub attack: Option<f64>,
    pub defense: Option<f64>,
    pub ascension: Option<AscensionCell>,
}

/// Strictly shaped extractor output; no canonicalisation has happened yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawFields {
    pub key: String,
    pub entity_type: EntityType,
    pub basic_info: Vec<LabeledCell>,
    pub leveled: LeveledRow,
    pub description: Option<String>,
}

impl RawFields {
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.basic_info.iter().map(|cell| cell.label.as_str())
    }
}

/// The tracked attribute set shared by candidates and stored records.
///
/// `None` means "not present on the page"; such fields never take part in a
/// diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFields {
    pub name: Option<String>,
    pub localized_name: Option<String>,
    pub rarity: Option<u8>,
    pub element: Option<Canonical<Element>>,
    pub weapon_category: Option<Canonical<WeaponCategory>>,
    pub region: Option<Canonical<Region>>,
    pub health: Option<f64>,
    pub attack: Option<f64>,
    pub defense: Option<f64>,
    pub ascension_stat: Option<Canonical<StatKind>>,
    pub ascension_value: Option<f64>,
    pub description: Option<String>,
    /// Artifact sets: effect text of the 2-piece bonus.
    pub two_piece_bonus: Option<String>,
    /// Artifact sets: effect text of the 4-piece bonus.
    pub four_piece_bonus: Option<String>,
}

impl EntityFields {
    /// Current value of a tracked field in its storage representation.
    #[must_use]
    pub fn value(&self, field: TrackedField) -> Option<FieldValue> {
        match field {
            TrackedField::Name => self.name.clone().map(FieldValue::Text),
            TrackedField::LocalizedName => self.localized_name.clone().map(FieldValue::Text),
            TrackedField::Rarity => self.rarity.map(|r| FieldValue::Integer(i64::from(r))),
            TrackedField::Element => self.element.as_ref().map(|v| FieldValue::Text(v.storage_value())),
            TrackedField::WeaponCategory => self
                .weapon_category
                .as_ref()
                .map(|v| FieldValue::Text(v.storage_value())),
            TrackedField::Region => self.region.as_ref().map(|v| FieldValue::Text(v.storage_value())),
            TrackedField::Health => self.health.map(FieldValue::Real),
            TrackedField::Attack => self.attack.map(FieldValue::Real),
            TrackedField::Defense => self.defense.map(FieldValue::Real),
            TrackedField::AscensionStat => self
                .ascension_stat
                .as_ref()
                .map(|v| FieldValue::Text(v.storage_value())),
            TrackedField::AscensionValue => self.ascension_value.map(FieldValue::Real),
            TrackedField::Description => self.description.clone().map(FieldValue::Text),
            TrackedField::TwoPieceBonus => self.two_piece_bonus.clone().map(FieldValue::Text),
            TrackedField::FourPieceBonus => self.four_piece_bonus.clone().map(FieldValue::Text),
        }
    }

    /// Overwrite one field; returns false when the value has the wrong shape.
    pub fn set(&mut self, field: TrackedField, value: &FieldValue) -> bool {
        match (field, value) {
            (TrackedField::Name, FieldValue::Text(v)) => self.name = Some(v.clone()),
            (TrackedField::LocalizedName, FieldValue::Text(v)) => self.localized_name = Some(v.clone()),
            (TrackedField::Rarity, FieldValue::Integer(v)) => match u8::try_from(*v) {
                Ok(rarity) => self.rarity = Some(rarity),
                Err(_) => return false,
            },
            (TrackedField::Element, FieldValue::Text(v)) => self.element = Some(Canonical::from_storage(v)),
            (TrackedField::WeaponCategory, FieldValue::Text(v)) => {
                self.weapon_category = Some(Canonical::from_storage(v));
            }
            (TrackedField::Region, FieldValue::Text(v)) => self.region = Some(Canonical::from_storage(v)),
            (TrackedField::Health, FieldValue::Real(v)) => self.health = Some(*v),
            (TrackedField::Attack, FieldValue::Real(v)) => self.attack = Some(*v),
            (TrackedField::Defense, FieldValue::Real(v)) => self.defense = Some(*v),
            (TrackedField::AscensionStat, FieldValue::Text(v)) => {
                self.ascension_stat = Some(Canonical::from_storage(v));
            }
            (TrackedField::AscensionValue, FieldValue::Real(v)) => self.ascension_value = Some(*v),
            (TrackedField::Description, FieldValue::Text(v)) => self.description = Some(v.clone()),
            (TrackedField::TwoPieceBonus, FieldValue::Text(v)) => self.two_piece_bonus = Some(v.clone()),
            (TrackedField::FourPieceBonus, FieldValue::Text(v)) => self.four_piece_bonus = Some(v.clone()),
            _ => return false,
        }
        true
    }

    pub fn apply(&mut self, diff: &FieldDiff) {
        for change in diff.iter() {
            self.set(change.field, &change.value);
        }
    }
}

/// Attributes the reconciler compares, one per storage column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Name,
    LocalizedName,
    Rarity,
    Element,
    WeaponCategory,
    Region,
    Health,
    Attack,
    Defense,
    AscensionStat,
    AscensionValue,
    Description,
    TwoPieceBonus,
    FourPieceBonus,
}

impl TrackedField {
    pub const ALL: [Self; 14] = [
        Self::Name,
        Self::LocalizedName,
        Self::Rarity,
        Self::Element,
        Self::WeaponCategory,
        Self::Region,
        Self::Health,
        Self::Attack,
        Self::Defense,
        Self::AscensionStat,
        Self::AscensionValue,
        Self::Description,
        Self::TwoPieceBonus,
        Self::FourPieceBonus,
    ];

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::LocalizedName => "localized_name",
            Self::Rarity => "rarity",
            Self::Element => "element",
            Self::WeaponCategory => "weapon_category",
            Self::Region => "region",
            Self::Health => "health",
            Self::Attack => "attack",
            Self::Defense => "defense",
            Self::AscensionStat => "ascension_stat",
            Self::AscensionValue => "ascension_value",
            Self::Description => "description",
            Self::TwoPieceBonus => "two_piece_bonus",
            Self::FourPieceBonus => "four_piece_bonus",
        }
    }

    /// Fields holding a canonical vocabulary value (and so possibly `unmapped:`).
    #[must_use]
    pub const fn is_classification(self) -> bool {
        matches!(
            self,
            Self::Element | Self::WeaponCategory | Self::Region | Self::AscensionStat
        )
    }
}

/// Storage representation of a single tracked value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl FieldValue {
    #[must_use]
    pub fn is_unmapped_marker(&self) -> bool {
        matches!(self, Self::Text(text) if text.starts_with(super::canonical::UNMAPPED_PREFIX))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: TrackedField,
    pub previous: Option<FieldValue>,
    pub value: FieldValue,
}

/// The set of field changes to apply to a stored record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldDiff {
    changes: Vec<FieldChange>,
}

impl FieldDiff {
    pub fn push(&mut self, change: FieldChange) {
        self.changes.push(change);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldChange> {
        self.changes.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = TrackedField> + '_ {
        self.changes.iter().map(|change| change.field)
    }
}

impl<'a> IntoIterator for &'a FieldDiff {
    type Item = &'a FieldChange;
    type IntoIter = std::slice::Iter<'a, FieldChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Typed, canonicalised attribute set for one entity, produced fresh each run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub entity_type: EntityType,
    pub key: EntityKey,
    pub fields: EntityFields,
}

/// Persisted counterpart of a candidate, with lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: i64,
    pub entity_type: EntityType,
    pub key: EntityKey,
    pub fields: EntityFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_mismatched_shapes() {
        let mut fields = EntityFields::default();
        assert!(!fields.set(TrackedField::Health, &FieldValue::Text("many".into())));
        assert!(!fields.set(TrackedField::Rarity, &FieldValue::Integer(300)));
        assert!(fields.set(TrackedField::Health, &FieldValue::Real(14695.0)));
        assert_eq!(fields.health, Some(14695.0));
    }

    #[test]
    fn apply_only_touches_changed_fields() {
        let mut fields = EntityFields {
            attack: Some(239.0),
            defense: Some(769.0),
            element: Some(Canonical::Mapped(Element::Anemo)),
            ..EntityFields::default()
        };
        let mut diff = FieldDiff::default();
        diff.push(FieldChange {
            field: TrackedField::Attack,
            previous: Some(FieldValue::Real(239.0)),
            value: FieldValue::Real(250.0),
        });

        fields.apply(&diff);

        assert_eq!(fields.attack, Some(250.0));
        assert_eq!(fields.defense, Some(769.0));
        assert_eq!(fields.element, Some(Canonical::Mapped(Element::Anemo)));
    }

    #[test]
    fn classification_values_use_storage_form() {
        let fields = EntityFields {
            region: Some(Canonical::Unmapped("坎瑞亚".into())),
            ..EntityFields::default()
        };
        let value = fields.value(TrackedField::Region).unwrap();
        assert_eq!(value, FieldValue::Text("unmapped:坎瑞亚".into()));
        assert!(value.is_unmapped_marker());
    }
}
