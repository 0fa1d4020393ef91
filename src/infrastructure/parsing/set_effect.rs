//! Set-effect layout (artifact set pages)
//!
//! Everything sits in a `div.attribute` block: star icons in `div.star`, the
//! set name in `div.name` and a `table.effect` whose rows pair a piece count
//! (`2件套`, `4件套`) with the bonus text. Sets carry no leveled stats.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::domain::{LabeledCell, LeveledRow, RawFields};
use crate::infrastructure::config::ExtractorConfig;

use super::error::{ExtractError, ExtractResult};
use super::landmarks::{TableReader, compile, element_text, pick_description};
use super::{EntityHints, LandmarkStrategy};

pub const SET_ATTRIBUTES: &str = "set attribute block";
pub const SET_EFFECT_TABLE: &str = "set effect table";
pub const RARITY_LABEL: &str = "稀有度";
pub const FULL_NAME_LABEL: &str = "全名";
pub const TWO_PIECE_LABEL: &str = "2件套";
pub const FOUR_PIECE_LABEL: &str = "4件套";

const STAR_ALT_PATTERN: &str = r"(\d+)\s*星";

pub struct ArtifactSetStrategy {
    reader: TableReader,
    attributes: Selector,
    stars: Selector,
    name: Selector,
    effect_table: Selector,
    paragraphs: Selector,
    star_alt: Regex,
    description_max_chars: usize,
}

impl ArtifactSetStrategy {
    pub fn new(config: &ExtractorConfig) -> ExtractResult<Self> {
        let star_alt = Regex::new(STAR_ALT_PATTERN).map_err(|e| ExtractError::InvalidPattern {
            pattern: STAR_ALT_PATTERN.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            reader: TableReader::new()?,
            attributes: compile("div.attribute")?,
            stars: compile("div.star")?,
            name: compile("div.name")?,
            effect_table: compile("table.effect")?,
            paragraphs: compile("div.mw-parser-output > p")?,
            star_alt,
            description_max_chars: config.description_max_chars,
        })
    }

    /// Sets drop at several rarities; the highest star icon is the set's rarity.
    fn rarity_cell(&self, attributes: ElementRef<'_>) -> Option<LabeledCell> {
        let image_alts = self.reader.image_hints(attributes.select(&self.stars).next()?);
        let highest = image_alts
            .iter()
            .filter_map(|alt| self.star_alt.captures(alt)?.get(1)?.as_str().parse::<usize>().ok())
            .filter(|stars| (1..=5).contains(stars))
            .max()?;
        Some(LabeledCell {
            label: RARITY_LABEL.to_string(),
            value: "★".repeat(highest),
            image_alts,
        })
    }

    fn name_cell(&self, attributes: ElementRef<'_>) -> Option<LabeledCell> {
        let name = element_text(attributes.select(&self.name).next()?);
        (!name.is_empty()).then(|| LabeledCell {
            label: FULL_NAME_LABEL.to_string(),
            value: name,
            image_alts: Vec::new(),
        })
    }

    /// `(piece label, bonus)` rows of the effect table.
    fn bonus_cells(&self, table: ElementRef<'_>) -> Vec<LabeledCell> {
        self.reader
            .rows(table)
            .into_iter()
            .filter_map(|row| {
                let [pieces, bonus, ..] = row.as_slice() else {
                    return None;
                };
                let label = piece_label(&pieces.text)?;
                (!bonus.text.is_empty()).then(|| LabeledCell {
                    label: label.to_string(),
                    value: bonus.text.clone(),
                    image_alts: Vec::new(),
                })
            })
            .collect()
    }
}

fn piece_label(text: &str) -> Option<&'static str> {
    if ["2件套", "二件套", "两件套"].iter().any(|marker| text.contains(marker)) {
        Some(TWO_PIECE_LABEL)
    } else if ["4件套", "四件套"].iter().any(|marker| text.contains(marker)) {
        Some(FOUR_PIECE_LABEL)
    } else {
        None
    }
}

impl LandmarkStrategy for ArtifactSetStrategy {
    fn name(&self) -> &'static str {
        "set-effect"
    }

    fn extract(&self, document: &Html, hints: &EntityHints) -> ExtractResult<RawFields> {
        let key = hints.key.as_str();
        let attributes = document
            .select(&self.attributes)
            .next()
            .ok_or_else(|| ExtractError::landmark_missing(SET_ATTRIBUTES, key))?;
        let table = attributes
            .select(&self.effect_table)
            .next()
            .ok_or_else(|| ExtractError::landmark_missing(SET_EFFECT_TABLE, key))?;

        let bonuses = self.bonus_cells(table);
        if bonuses.is_empty() {
            return Err(ExtractError::malformed(SET_EFFECT_TABLE, key, "no 2-piece or 4-piece bonus row"));
        }

        let mut basic_info: Vec<LabeledCell> = self.name_cell(attributes).into_iter().collect();
        basic_info.extend(self.rarity_cell(attributes));
        basic_info.extend(bonuses);

        let description = pick_description(
            document
                .select(&self.paragraphs)
                .map(element_text)
                .filter(|text| !text.contains("件套")),
            self.description_max_chars,
        );

        Ok(RawFields {
            key: key.to_string(),
            entity_type: hints.entity_type,
            basic_info,
            leveled: LeveledRow::default(),
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;
    use rstest::rstest;

    const GLADIATOR: &str = include_str!("../../../tests/fixtures/artifact_gladiators_finale.html");

    fn extract(html: &str) -> ExtractResult<RawFields> {
        let strategy = ArtifactSetStrategy::new(&ExtractorConfig::default()).unwrap();
        strategy.extract(
            &Html::parse_document(html),
            &EntityHints::new(EntityType::Artifact, "角斗士的终幕礼"),
        )
    }

    fn value<'a>(fields: &'a RawFields, label: &str) -> Option<&'a str> {
        fields
            .basic_info
            .iter()
            .find(|cell| cell.label == label)
            .map(|cell| cell.value.as_str())
    }

    #[test]
    fn reads_name_rarity_and_both_bonuses() {
        let fields = extract(GLADIATOR).unwrap();

        assert_eq!(value(&fields, FULL_NAME_LABEL), Some("角斗士的终幕礼（Gladiator's Finale）"));
        assert_eq!(value(&fields, RARITY_LABEL), Some("★★★★★"));
        assert_eq!(value(&fields, TWO_PIECE_LABEL), Some("攻击力提高18%。"));
        assert!(value(&fields, FOUR_PIECE_LABEL).unwrap().starts_with("装备该圣遗物套装的角色"));
        assert_eq!(fields.leveled, LeveledRow::default());
        let description = fields.description.unwrap();
        assert!(description.starts_with("传说中的角斗士"), "{description}");
    }

    #[test]
    fn missing_attribute_block_is_a_landmark_error() {
        let err = extract("<div class='mw-parser-output'><p>not a set page</p></div>").unwrap_err();
        assert_eq!(err, ExtractError::landmark_missing(SET_ATTRIBUTES, "角斗士的终幕礼"));
    }

    #[test]
    fn effect_table_without_bonus_rows_is_malformed() {
        let html = r#"<div class="attribute"><table class="effect"><tr><td>来源</td><td>秘境</td></tr></table></div>"#;
        assert!(matches!(extract(html), Err(ExtractError::MalformedTable { .. })));
    }

    #[rstest]
    #[case("2件套效果", Some(TWO_PIECE_LABEL))]
    #[case("二件套", Some(TWO_PIECE_LABEL))]
    #[case("四件套", Some(FOUR_PIECE_LABEL))]
    #[case("1件套", None)]
    fn piece_counts(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(piece_label(text), expected);
    }

    #[test]
    fn single_piece_sets_keep_their_one_bonus_and_lower_rarity() {
        let html = r#"
            <div class="attribute">
              <div class="star"><img alt="圣遗物套装-3星.png"><img alt="圣遗物套装-4星.png"></div>
              <table class="effect"><tr><td>2件套</td><td>元素充能效率提高20%。</td></tr></table>
            </div>"#;
        let fields = extract(html).unwrap();
        assert_eq!(value(&fields, RARITY_LABEL), Some("★★★★"));
        assert_eq!(value(&fields, FOUR_PIECE_LABEL), None);
        assert_eq!(value(&fields, FULL_NAME_LABEL), None);
    }
}
