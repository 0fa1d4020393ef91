//! Card layout (weapon pages)
//!
//! The basic information sits in a `div.YSCard`: star glyphs in
//! `.card-title1`, a `base /// secondary` stat summary in `.card-title2` and
//! `Label：Value` lines in the card body. The level table lives under
//! `div.YS-WeaponData`.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::domain::{LabeledCell, RawFields};
use crate::infrastructure::config::ExtractorConfig;

use super::error::{ExtractError, ExtractResult};
use super::landmarks::{TableReader, compile, element_text, pick_description, read_leveled_row};
use super::{EntityHints, LandmarkStrategy};

pub const INFO_CARD: &str = "info card";
pub const RARITY_LABEL: &str = "稀有度";

const LABEL_VALUE_PATTERN: &str = r"^\s*([^：:\s][^：:]{0,11}?)\s*[：:]\s*(\S.*?)\s*$";

pub struct CardLayoutStrategy {
    reader: TableReader,
    card: Selector,
    rarity_title: Selector,
    stat_title: Selector,
    lines: Selector,
    data_tables: Selector,
    paragraphs: Selector,
    label_value: Regex,
    reference_level: String,
    description_max_chars: usize,
}

impl CardLayoutStrategy {
    pub fn new(config: &ExtractorConfig) -> ExtractResult<Self> {
        let label_value = Regex::new(LABEL_VALUE_PATTERN).map_err(|e| ExtractError::InvalidPattern {
            pattern: LABEL_VALUE_PATTERN.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            reader: TableReader::new()?,
            card: compile("div.YSCard")?,
            rarity_title: compile(".card-title1")?,
            stat_title: compile(".card-title2")?,
            lines: compile("p, li")?,
            data_tables: compile("div.YS-WeaponData table")?,
            paragraphs: compile("div.mw-parser-output > p")?,
            label_value,
            reference_level: config.reference_level.clone(),
            description_max_chars: config.description_max_chars,
        })
    }

    fn rarity_cell(&self, card: ElementRef<'_>) -> Option<LabeledCell> {
        let title = card.select(&self.rarity_title).next()?;
        let stars = element_text(title).chars().filter(|c| *c == '★').count();
        let image_alts = self.reader.image_hints(title);
        if stars == 0 && image_alts.is_empty() {
            return None;
        }
        Some(LabeledCell {
            label: RARITY_LABEL.to_string(),
            value: "★".repeat(stars),
            image_alts,
        })
    }

    /// Name of the secondary stat from `攻击力 48-674 /// 物理伤害加成 9.0%-41.3%`.
    fn secondary_stat_label(&self, card: ElementRef<'_>) -> Option<String> {
        let summary = element_text(card.select(&self.stat_title).next()?);
        let (_, secondary) = summary.split_once("///")?;
        let label: String = secondary
            .trim()
            .chars()
            .take_while(|c| !c.is_ascii_digit())
            .collect();
        let label = label.trim();
        (!label.is_empty()).then(|| label.to_string())
    }

    fn line_cells(&self, card: ElementRef<'_>) -> Vec<LabeledCell> {
        card.select(&self.lines)
            .filter_map(|line| {
                let text = element_text(line);
                let captures = self.label_value.captures(&text)?;
                Some(LabeledCell {
                    label: captures.get(1)?.as_str().to_string(),
                    value: captures.get(2)?.as_str().to_string(),
                    image_alts: self.reader.image_hints(line),
                })
            })
            .collect()
    }
}

impl LandmarkStrategy for CardLayoutStrategy {
    fn name(&self) -> &'static str {
        "card-layout"
    }

    fn extract(&self, document: &Html, hints: &EntityHints) -> ExtractResult<RawFields> {
        let key = hints.key.as_str();
        let card = document
            .select(&self.card)
            .next()
            .ok_or_else(|| ExtractError::landmark_missing(INFO_CARD, key))?;

        let mut basic_info: Vec<LabeledCell> = self.rarity_cell(card).into_iter().collect();
        basic_info.extend(self.line_cells(card));
        for table in self.reader.tables(card) {
            basic_info.extend(self.reader.labeled_cells(table));
        }

        let secondary_label = self.secondary_stat_label(card);
        let weapon_tables: Vec<ElementRef<'_>> = document.select(&self.data_tables).collect();
        let tables: Vec<ElementRef<'_>> = if weapon_tables.is_empty() {
            self.reader.document_tables(document).collect()
        } else {
            weapon_tables
        };
        let leveled = read_leveled_row(
            tables.into_iter().map(|table| self.reader.rows(table)),
            &self.reference_level,
            secondary_label.as_deref(),
            key,
        )?;

        if basic_info.is_empty() {
            return Err(ExtractError::malformed(INFO_CARD, key, "card carries no labelled values"));
        }

        let description = pick_description(
            card.select(&self.lines)
                .map(element_text)
                .filter(|text| !text.contains("///") && !self.label_value.is_match(text))
                .chain(document.select(&self.paragraphs).map(element_text)),
            self.description_max_chars,
        );

        Ok(RawFields {
            key: key.to_string(),
            entity_type: hints.entity_type,
            basic_info,
            leveled,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;

    const AQUILA: &str = include_str!("../../../tests/fixtures/weapon_aquila_favonia.html");

    fn extract(html: &str) -> ExtractResult<RawFields> {
        let strategy = CardLayoutStrategy::new(&ExtractorConfig::default()).unwrap();
        strategy.extract(&Html::parse_document(html), &EntityHints::new(EntityType::Weapon, "风鹰剑"))
    }

    #[test]
    fn reads_card_lines_and_weapon_table() {
        let fields = extract(AQUILA).unwrap();

        assert_eq!(fields.basic_info[0].label, RARITY_LABEL);
        assert_eq!(fields.basic_info[0].value, "★★★★★");
        let category = fields.basic_info.iter().find(|c| c.label == "类型").unwrap();
        assert_eq!(category.value, "单手剑");

        assert_eq!(fields.leveled.attack, Some(674.0));
        assert_eq!(fields.leveled.health, None);
        let ascension = fields.leveled.ascension.unwrap();
        assert_eq!(ascension.label, "物理伤害加成");
        assert!((ascension.value - 41.3).abs() < 1e-9);
        assert!(fields.description.unwrap().starts_with("西风骑士团的旧日荣光"));
    }

    #[test]
    fn missing_card_is_a_landmark_error() {
        let err = extract("<div class='mw-parser-output'><p>nothing here</p></div>").unwrap_err();
        assert_eq!(err, ExtractError::landmark_missing(INFO_CARD, "风鹰剑"));
    }

    #[test]
    fn star_images_stand_in_for_glyphs() {
        let html = r#"
            <div class="YSCard">
              <div class="card-title1"><img alt="4星" src="/images/4星.png"></div>
              <div><p>类型：弓</p></div>
            </div>
            <table><tr><th>等级</th><th>攻击力</th><th>元素充能效率</th></tr>
              <tr><td>90</td><td>565</td><td>30.6%</td></tr></table>"#;
        let fields = extract(html).unwrap();
        assert_eq!(fields.basic_info[0].image_alts, vec!["4星".to_string()]);
        assert_eq!(fields.leveled.ascension.unwrap().label, "元素充能效率");
    }
}
