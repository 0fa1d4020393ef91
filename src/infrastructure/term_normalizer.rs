//! Term normalization
//!
//! Resolves source-language labels and values to the canonical vocabularies.
//! Every lookup is an exact match on a folded token (half-width, lowercase,
//! no whitespace). Alternate row labels for the same concept (`神之眼`,
//! `神之心`, `古龙大权`, ...) are aliases of one logical field, so no entity
//! needs special handling.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::domain::{
    Canonical, CanonicalName, CandidateRecord, Element, EntityFields, EntityKey, EntityKeyError, LabeledCell,
    RawFields, Region, StatKind, WeaponCategory,
};
use crate::infrastructure::config::ExtraAliases;
use crate::infrastructure::parsing::landmarks::to_half_width;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid entity key: {0}")]
    InvalidKey(#[from] EntityKeyError),

    #[error("alias '{token}' for {field} points at unknown canonical value '{target}'")]
    InvalidAlias {
        field: &'static str,
        token: String,
        target: String,
    },
}

/// Non-terminal findings; the record is still produced.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizeWarning {
    #[error("{field}: '{token}' is not in the vocabulary")]
    UnmappedTerm { field: &'static str, token: String },

    #[error("{field}: '{kept_label}' = '{kept_value}' wins over '{dropped_label}' = '{dropped_value}'")]
    ConflictingAliases {
        field: &'static str,
        kept_label: String,
        kept_value: String,
        dropped_label: String,
        dropped_value: String,
    },

    #[error("rarity '{value}' is not a star count between 1 and 5")]
    InvalidRarity { value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized {
    pub record: CandidateRecord,
    pub warnings: Vec<NormalizeWarning>,
}

/// Logical basic-info fields that source labels resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LogicalField {
    FullName,
    Rarity,
    Element,
    WeaponCategory,
    Region,
    TwoPieceBonus,
    FourPieceBonus,
}

impl LogicalField {
    const fn name(self) -> &'static str {
        match self {
            Self::FullName => "name",
            Self::Rarity => "rarity",
            Self::Element => "element",
            Self::WeaponCategory => "weapon_category",
            Self::Region => "region",
            Self::TwoPieceBonus => "two_piece_bonus",
            Self::FourPieceBonus => "four_piece_bonus",
        }
    }
}

/// `(label, field, priority)`; a lower priority number wins a conflict.
const LABEL_ALIASES: &[(&str, LogicalField, u8)] = &[
    ("全名", LogicalField::FullName, 0),
    ("本名", LogicalField::FullName, 1),
    ("名称", LogicalField::FullName, 2),
    ("full name", LogicalField::FullName, 0),
    ("稀有度", LogicalField::Rarity, 0),
    ("星级", LogicalField::Rarity, 1),
    ("rarity", LogicalField::Rarity, 0),
    ("神之眼", LogicalField::Element, 0),
    ("元素", LogicalField::Element, 1),
    ("元素属性", LogicalField::Element, 1),
    ("神之心", LogicalField::Element, 2),
    ("古龙大权", LogicalField::Element, 3),
    ("element", LogicalField::Element, 0),
    ("vision", LogicalField::Element, 1),
    ("武器类型", LogicalField::WeaponCategory, 0),
    ("武器种类", LogicalField::WeaponCategory, 1),
    ("类型", LogicalField::WeaponCategory, 2),
    ("weapon type", LogicalField::WeaponCategory, 0),
    ("weapon", LogicalField::WeaponCategory, 1),
    ("所属地区", LogicalField::Region, 0),
    ("地区", LogicalField::Region, 1),
    ("所属", LogicalField::Region, 2),
    ("region", LogicalField::Region, 0),
    ("2件套", LogicalField::TwoPieceBonus, 0),
    ("二件套", LogicalField::TwoPieceBonus, 1),
    ("两件套", LogicalField::TwoPieceBonus, 1),
    ("2-piece", LogicalField::TwoPieceBonus, 0),
    ("4件套", LogicalField::FourPieceBonus, 0),
    ("四件套", LogicalField::FourPieceBonus, 1),
    ("4-piece", LogicalField::FourPieceBonus, 0),
];

const ELEMENT_ALIASES: &[(&str, Element)] = &[
    ("火", Element::Pyro),
    ("水", Element::Hydro),
    ("风", Element::Anemo),
    ("風", Element::Anemo),
    ("雷", Element::Electro),
    ("草", Element::Dendro),
    ("冰", Element::Cryo),
    ("岩", Element::Geo),
];

const WEAPON_ALIASES: &[(&str, WeaponCategory)] = &[
    ("单手剑", WeaponCategory::Sword),
    ("双手剑", WeaponCategory::Claymore),
    ("长柄武器", WeaponCategory::Polearm),
    ("长枪", WeaponCategory::Polearm),
    ("弓", WeaponCategory::Bow),
    ("弓箭", WeaponCategory::Bow),
    ("法器", WeaponCategory::Catalyst),
];

const REGION_ALIASES: &[(&str, Region)] = &[
    ("蒙德", Region::Mondstadt),
    ("璃月", Region::Liyue),
    ("稻妻", Region::Inazuma),
    ("须弥", Region::Sumeru),
    ("枫丹", Region::Fontaine),
    ("纳塔", Region::Natlan),
    ("至冬", Region::Snezhnaya),
    ("至冬国", Region::Snezhnaya),
];

const STAT_ALIASES: &[(&str, StatKind)] = &[
    ("生命值", StatKind::HpPercent),
    ("生命值百分比", StatKind::HpPercent),
    ("生命", StatKind::HpPercent),
    ("hp", StatKind::HpPercent),
    ("攻击力", StatKind::AtkPercent),
    ("攻击力百分比", StatKind::AtkPercent),
    ("攻击", StatKind::AtkPercent),
    ("atk", StatKind::AtkPercent),
    ("防御力", StatKind::DefPercent),
    ("防御力百分比", StatKind::DefPercent),
    ("防御", StatKind::DefPercent),
    ("def", StatKind::DefPercent),
    ("暴击率", StatKind::CritRate),
    ("critrate", StatKind::CritRate),
    ("暴击伤害", StatKind::CritDmg),
    ("critdmg", StatKind::CritDmg),
    ("元素充能效率", StatKind::EnergyRecharge),
    ("元素充能", StatKind::EnergyRecharge),
    ("充能效率", StatKind::EnergyRecharge),
    ("energyrecharge", StatKind::EnergyRecharge),
    ("元素精通", StatKind::ElementalMastery),
    ("elementalmastery", StatKind::ElementalMastery),
    ("治疗加成", StatKind::HealingBonus),
    ("治疗", StatKind::HealingBonus),
    ("healingbonus", StatKind::HealingBonus),
    ("物理伤害加成", StatKind::PhysicalDmgBonus),
    ("物理伤害", StatKind::PhysicalDmgBonus),
    ("physicaldmgbonus", StatKind::PhysicalDmgBonus),
    ("元素伤害加成", StatKind::ElementalDmgBonus),
    ("元素伤害", StatKind::ElementalDmgBonus),
];

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

/// Folded lookup form of a token.
pub fn fold_token(raw: &str) -> String {
    let mut token: String = to_half_width(raw)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    for extension in IMAGE_EXTENSIONS {
        if let Some(stripped) = token.strip_suffix(extension) {
            token = stripped.to_string();
            break;
        }
    }
    token.trim_end_matches(&[':', '%'][..]).to_string()
}

/// One vocabulary: folded token -> canonical member.
#[derive(Debug, Clone)]
struct Vocabulary<T> {
    field: &'static str,
    entries: HashMap<String, T>,
}

impl<T: CanonicalName> Vocabulary<T> {
    fn new(field: &'static str, aliases: &[(&str, T)]) -> Self {
        let mut entries: HashMap<String, T> = aliases
            .iter()
            .map(|(token, member)| (fold_token(token), *member))
            .collect();
        for member in T::ALL {
            entries.insert(fold_token(member.canonical_name()), *member);
        }
        Self { field, entries }
    }

    fn insert(&mut self, token: &str, member: T) {
        self.entries.insert(fold_token(token), member);
    }

    fn extend(&mut self, extra: &HashMap<String, String>) -> Result<(), NormalizeError> {
        let mut tokens: Vec<_> = extra.iter().collect();
        tokens.sort();
        for (token, target) in tokens {
            let member = T::from_canonical(target).ok_or_else(|| NormalizeError::InvalidAlias {
                field: self.field,
                token: token.clone(),
                target: target.clone(),
            })?;
            self.insert(token, member);
        }
        Ok(())
    }

    fn lookup(&self, raw: &str) -> Option<T> {
        self.entries.get(&fold_token(raw)).copied()
    }

    /// Mapped member, or the raw token flagged as unmapped plus a warning.
    fn resolve(&self, raw: &str, warnings: &mut Vec<NormalizeWarning>) -> Canonical<T> {
        if let Some(member) = self.lookup(raw) {
            return Canonical::Mapped(member);
        }
        let token = raw.trim().to_string();
        debug!(field = self.field, token = %token, "unmapped term");
        warnings.push(NormalizeWarning::UnmappedTerm {
            field: self.field,
            token: token.clone(),
        });
        Canonical::Unmapped(token)
    }
}

pub struct TermNormalizer {
    labels: HashMap<String, (LogicalField, u8)>,
    elements: Vocabulary<Element>,
    weapons: Vocabulary<WeaponCategory>,
    regions: Vocabulary<Region>,
    stats: Vocabulary<StatKind>,
}

struct Resolved<'a> {
    cell: &'a LabeledCell,
    priority: u8,
}

impl TermNormalizer {
    pub fn new(extra: &ExtraAliases) -> Result<Self, NormalizeError> {
        let labels = LABEL_ALIASES
            .iter()
            .map(|(label, field, priority)| (fold_token(label), (*field, *priority)))
            .collect();

        let mut elements = Vocabulary::new("element", ELEMENT_ALIASES);
        for (token, element) in ELEMENT_ALIASES {
            elements.insert(&format!("{token}元素"), *element);
        }
        let mut stats = Vocabulary::new("ascension_stat", STAT_ALIASES);
        for (token, _) in ELEMENT_ALIASES {
            stats.insert(&format!("{token}元素伤害加成"), StatKind::ElementalDmgBonus);
        }
        let mut weapons = Vocabulary::new("weapon_category", WEAPON_ALIASES);
        let mut regions = Vocabulary::new("region", REGION_ALIASES);

        elements.extend(&extra.element)?;
        weapons.extend(&extra.weapon_category)?;
        regions.extend(&extra.region)?;
        stats.extend(&extra.stat_kind)?;

        Ok(Self {
            labels,
            elements,
            weapons,
            regions,
            stats,
        })
    }

    /// Label -> logical field; `全名/本名` style labels resolve through their parts.
    fn resolve_label(&self, label: &str) -> Option<(LogicalField, u8)> {
        self.labels.get(&fold_token(label)).copied().or_else(|| {
            label
                .split('/')
                .filter_map(|part| self.labels.get(&fold_token(part)).copied())
                .min_by_key(|(_, priority)| *priority)
        })
    }

    /// Picks one cell per logical field; a disagreeing lower-priority alias is
    /// reported, not silently dropped.
    fn select_cells<'a>(
        &self,
        cells: &'a [LabeledCell],
        warnings: &mut Vec<NormalizeWarning>,
    ) -> HashMap<LogicalField, &'a LabeledCell> {
        let mut chosen: HashMap<LogicalField, Resolved<'a>> = HashMap::new();
        let mut order: Vec<LogicalField> = Vec::new();

        for cell in cells {
            let Some((field, priority)) = self.resolve_label(&cell.label) else {
                continue;
            };
            let Some(current) = chosen.get_mut(&field) else {
                order.push(field);
                chosen.insert(field, Resolved { cell, priority });
                continue;
            };

            let (kept, dropped) = if priority < current.priority {
                let previous = current.cell;
                *current = Resolved { cell, priority };
                (cell, previous)
            } else {
                (current.cell, cell)
            };
            if fold_token(&kept.value) != fold_token(&dropped.value) {
                warnings.push(NormalizeWarning::ConflictingAliases {
                    field: field.name(),
                    kept_label: kept.label.clone(),
                    kept_value: kept.value.clone(),
                    dropped_label: dropped.label.clone(),
                    dropped_value: dropped.value.clone(),
                });
            }
        }

        order
            .into_iter()
            .filter_map(|field| chosen.remove(&field).map(|r| (field, r.cell)))
            .collect()
    }

    pub fn normalize(&self, raw: &RawFields) -> Result<Normalized, NormalizeError> {
        let key = EntityKey::new(&raw.key)?;
        let mut warnings = Vec::new();
        let cells = self.select_cells(&raw.basic_info, &mut warnings);

        let mut fields = EntityFields {
            name: Some(key.as_str().to_string()),
            ..EntityFields::default()
        };

        if let Some(cell) = cells.get(&LogicalField::FullName) {
            let (name, localized) = split_full_name(&cell.value);
            if !name.is_empty() {
                fields.name = Some(name);
            }
            fields.localized_name = localized;
        }
        if let Some(cell) = cells.get(&LogicalField::Rarity) {
            fields.rarity = parse_rarity(cell);
            if fields.rarity.is_none() {
                warnings.push(NormalizeWarning::InvalidRarity {
                    value: cell_token(cell).to_string(),
                });
            }
        }
        if let Some(cell) = cells.get(&LogicalField::Element) {
            fields.element = Some(self.elements.resolve(cell_token(cell), &mut warnings));
        }
        if let Some(cell) = cells.get(&LogicalField::WeaponCategory) {
            fields.weapon_category = Some(self.weapons.resolve(cell_token(cell), &mut warnings));
        }
        if let Some(cell) = cells.get(&LogicalField::Region) {
            fields.region = Some(self.regions.resolve(cell_token(cell), &mut warnings));
        }
        let free_text = |field: LogicalField| {
            cells
                .get(&field)
                .map(|cell| cell.value.trim().to_string())
                .filter(|text| !text.is_empty())
        };
        fields.two_piece_bonus = free_text(LogicalField::TwoPieceBonus);
        fields.four_piece_bonus = free_text(LogicalField::FourPieceBonus);

        let leveled = &raw.leveled;
        fields.health = leveled.health;
        fields.attack = leveled.attack;
        fields.defense = leveled.defense;
        if let Some(ascension) = &leveled.ascension {
            fields.ascension_stat = Some(self.stats.resolve(&ascension.label, &mut warnings));
            fields.ascension_value = Some(ascension.value);
        }
        fields.description.clone_from(&raw.description);

        Ok(Normalized {
            record: CandidateRecord {
                entity_type: raw.entity_type,
                key,
                fields,
            },
            warnings,
        })
    }
}

/// The value text, or the first image hint when the cell only holds an icon.
fn cell_token(cell: &LabeledCell) -> &str {
    if cell.value.trim().is_empty() {
        cell.image_alts.first().map_or("", String::as_str)
    } else {
        cell.value.as_str()
    }
}

/// `琴·古恩希尔德（Jean Gunnhildr）` -> (`琴·古恩希尔德`, `Some("Jean Gunnhildr")`).
fn split_full_name(value: &str) -> (String, Option<String>) {
    let folded = to_half_width(value);
    let Some(open) = folded.find('(') else {
        return (value.trim().to_string(), None);
    };
    let name = folded[..open].trim().to_string();
    let inner = folded[open + 1..].split(')').next().unwrap_or_default().trim();
    let is_latin = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.'));
    (name, is_latin.then(|| inner.to_string()))
}

/// Star glyphs, then `5星`-style image hints, then a bare number. Only the
/// first run of digits counts, so `10` is ten (and rejected), never one.
fn parse_rarity(cell: &LabeledCell) -> Option<u8> {
    let stars = cell.value.chars().filter(|c| matches!(c, '★' | '☆')).count();
    let from_stars = u8::try_from(stars).ok().filter(|n| *n > 0);
    let from_digits = |text: &str| {
        let folded = to_half_width(text);
        let digits: String = folded
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        // Longer runs than u8 holds are out of range as well.
        (!digits.is_empty()).then(|| digits.parse::<u8>().unwrap_or(u8::MAX))
    };

    from_stars
        .or_else(|| cell.image_alts.iter().find_map(|alt| from_digits(alt)))
        .or_else(|| from_digits(&cell.value))
        .filter(|rarity| (1..=5).contains(rarity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AscensionCell, EntityType, LeveledRow};
    use rstest::rstest;

    fn normalizer() -> TermNormalizer {
        TermNormalizer::new(&ExtraAliases::default()).unwrap()
    }

    fn cell(label: &str, value: &str) -> LabeledCell {
        LabeledCell {
            label: label.to_string(),
            value: value.to_string(),
            image_alts: Vec::new(),
        }
    }

    fn raw(cells: Vec<LabeledCell>, ascension: Option<(&str, f64)>) -> RawFields {
        RawFields {
            key: "琴".to_string(),
            entity_type: EntityType::Character,
            basic_info: cells,
            leveled: LeveledRow {
                level: "90".to_string(),
                health: Some(14695.0),
                attack: Some(239.0),
                defense: Some(769.0),
                ascension: ascension.map(|(label, value)| AscensionCell {
                    label: label.to_string(),
                    value,
                }),
            },
            description: None,
        }
    }

    #[rstest]
    #[case("风", Element::Anemo)]
    #[case("风元素", Element::Anemo)]
    #[case(" 岩 元素 ", Element::Geo)]
    #[case("Anemo", Element::Anemo)]
    #[case("PYRO", Element::Pyro)]
    #[case("冰元素.png", Element::Cryo)]
    fn element_variants(#[case] token: &str, #[case] expected: Element) {
        assert_eq!(normalizer().elements.lookup(token), Some(expected));
    }

    #[rstest]
    #[case("治疗加成", StatKind::HealingBonus)]
    #[case("healing_bonus", StatKind::HealingBonus)]
    #[case("Healing Bonus", StatKind::HealingBonus)]
    #[case("物理伤害加成", StatKind::PhysicalDmgBonus)]
    #[case("风元素伤害加成", StatKind::ElementalDmgBonus)]
    #[case("生命值%", StatKind::HpPercent)]
    #[case("元素充能效率", StatKind::EnergyRecharge)]
    fn stat_variants(#[case] token: &str, #[case] expected: StatKind) {
        assert_eq!(normalizer().stats.lookup(token), Some(expected));
    }

    #[test]
    fn basic_info_resolves_to_canonical_fields() {
        let raw = raw(
            vec![
                cell("全名/本名", "琴·古恩希尔德（Jean Gunnhildr）"),
                cell("所属地区", "蒙德"),
                cell("神之眼", "风元素"),
                cell("武器类型", "单手剑"),
                LabeledCell {
                    image_alts: vec!["5星.png".to_string()],
                    ..cell("稀有度", "")
                },
            ],
            Some(("治疗加成", 22.2)),
        );

        let normalized = normalizer().normalize(&raw).unwrap();
        let fields = normalized.record.fields;

        assert!(normalized.warnings.is_empty());
        assert_eq!(fields.name.as_deref(), Some("琴·古恩希尔德"));
        assert_eq!(fields.localized_name.as_deref(), Some("Jean Gunnhildr"));
        assert_eq!(fields.rarity, Some(5));
        assert_eq!(fields.element, Some(Canonical::Mapped(Element::Anemo)));
        assert_eq!(fields.weapon_category, Some(Canonical::Mapped(WeaponCategory::Sword)));
        assert_eq!(fields.region, Some(Canonical::Mapped(Region::Mondstadt)));
        assert_eq!(fields.ascension_stat, Some(Canonical::Mapped(StatKind::HealingBonus)));
        assert_eq!(fields.ascension_value, Some(22.2));
    }

    #[test]
    fn unknown_token_is_flagged_not_guessed() {
        let raw = raw(vec![cell("神之眼", "暗"), cell("所属地区", "坎瑞亚")], None);

        let normalized = normalizer().normalize(&raw).unwrap();

        assert_eq!(normalized.record.fields.element, Some(Canonical::Unmapped("暗".into())));
        assert_eq!(normalized.record.fields.region, Some(Canonical::Unmapped("坎瑞亚".into())));
        assert_eq!(normalized.warnings.len(), 2);
        assert!(matches!(
            &normalized.warnings[0],
            NormalizeWarning::UnmappedTerm { field: "element", token } if token == "暗"
        ));
    }

    #[test]
    fn alternate_element_labels_share_one_field() {
        for label in ["神之心", "古龙大权", "Vision"] {
            let normalized = normalizer().normalize(&raw(vec![cell(label, "冰")], None)).unwrap();
            assert_eq!(normalized.record.fields.element, Some(Canonical::Mapped(Element::Cryo)));
        }
    }

    #[test]
    fn conflicting_aliases_keep_primary_label_and_warn() {
        let raw = raw(vec![cell("神之心", "冰"), cell("神之眼", "风")], None);

        let normalized = normalizer().normalize(&raw).unwrap();

        assert_eq!(normalized.record.fields.element, Some(Canonical::Mapped(Element::Anemo)));
        assert_eq!(
            normalized.warnings,
            vec![NormalizeWarning::ConflictingAliases {
                field: "element",
                kept_label: "神之眼".into(),
                kept_value: "风".into(),
                dropped_label: "神之心".into(),
                dropped_value: "冰".into(),
            }]
        );
    }

    #[test]
    fn agreeing_aliases_are_not_a_conflict() {
        let raw = raw(vec![cell("神之眼", "风"), cell("元素", "风")], None);
        assert!(normalizer().normalize(&raw).unwrap().warnings.is_empty());
    }

    #[test]
    fn extra_aliases_extend_vocabulary() {
        let mut extra = ExtraAliases::default();
        extra.region.insert("坎瑞亚".to_string(), "Snezhnaya".to_string());
        let normalizer = TermNormalizer::new(&extra).unwrap();
        assert_eq!(normalizer.regions.lookup("坎瑞亚"), Some(Region::Snezhnaya));

        extra.region.insert("天空岛".to_string(), "Celestia".to_string());
        assert!(matches!(
            TermNormalizer::new(&extra),
            Err(NormalizeError::InvalidAlias { field: "region", .. })
        ));
    }

    #[rstest]
    #[case("★★★★", Some(4))]
    #[case("5", Some(5))]
    #[case("５星", Some(5))]
    #[case("9", None)]
    #[case("0", None)]
    #[case("10", None)]
    #[case("15星", None)]
    #[case("300", None)]
    #[case("99999999999", None)]
    #[case("未知", None)]
    fn rarity_takes_the_whole_leading_number(#[case] value: &str, #[case] expected: Option<u8>) {
        assert_eq!(parse_rarity(&cell("稀有度", value)), expected);
    }

    #[test]
    fn rarity_prefers_image_hints_over_bare_digits() {
        let star_icon = LabeledCell {
            label: "稀有度".to_string(),
            value: String::new(),
            image_alts: vec!["圣遗物套装-4星.png".to_string()],
        };
        assert_eq!(parse_rarity(&star_icon), Some(4));
    }

    #[test]
    fn two_digit_rarity_raises_a_warning() {
        let raw = raw(vec![cell("稀有度", "10")], None);
        let normalized = normalizer().normalize(&raw).unwrap();
        assert_eq!(normalized.record.fields.rarity, None);
        assert_eq!(
            normalized.warnings,
            vec![NormalizeWarning::InvalidRarity { value: "10".to_string() }]
        );
    }

    #[test]
    fn set_bonus_labels_fill_free_text_fields() {
        let mut raw = raw(
            vec![
                cell("二件套", "攻击力提高18%。"),
                cell("4件套", " 普通攻击造成的伤害提升35%。 "),
                cell("2件套", "攻击力提高18%。"),
            ],
            None,
        );
        raw.entity_type = EntityType::Artifact;
        raw.leveled = LeveledRow::default();

        let normalized = normalizer().normalize(&raw).unwrap();
        let fields = &normalized.record.fields;

        assert_eq!(fields.two_piece_bonus.as_deref(), Some("攻击力提高18%。"));
        assert_eq!(fields.four_piece_bonus.as_deref(), Some("普通攻击造成的伤害提升35%。"));
        assert_eq!(fields.health, None);
        assert!(normalized.warnings.is_empty(), "{:?}", normalized.warnings);
    }

    #[test]
    fn blank_key_is_an_error() {
        let mut raw = raw(Vec::new(), None);
        raw.key = "  ".to_string();
        assert_eq!(
            normalizer().normalize(&raw),
            Err(NormalizeError::InvalidKey(EntityKeyError::Empty))
        );
    }
}
