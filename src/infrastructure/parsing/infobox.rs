//! Infobox-table layout (character pages)
//!
//! A basic-information table of `th`/`td` label rows, identified by its
//! labels, and a leveled stats table identified by its level header.

use scraper::{Html, Selector};

use crate::domain::RawFields;
use crate::infrastructure::config::ExtractorConfig;

use super::error::{ExtractError, ExtractResult};
use super::landmarks::{TableReader, compile, element_text, pick_description, read_leveled_row};
use super::{EntityHints, LandmarkStrategy};

pub const BASIC_INFO_TABLE: &str = "basic info table";

/// Row labels that only ever appear in the basic information table.
const BASIC_INFO_MARKERS: &[&str] = &[
    "全名", "本名", "所属地区", "所属", "神之眼", "神之心", "古龙大权", "武器类型", "稀有度", "星级",
    "full name", "rarity", "element", "region", "weapon type",
];

pub struct InfoboxTableStrategy {
    reader: TableReader,
    paragraphs: Selector,
    reference_level: String,
    description_max_chars: usize,
}

impl InfoboxTableStrategy {
    pub fn new(config: &ExtractorConfig) -> ExtractResult<Self> {
        Ok(Self {
            reader: TableReader::new()?,
            paragraphs: compile("div.mw-parser-output > p")?,
            reference_level: config.reference_level.clone(),
            description_max_chars: config.description_max_chars,
        })
    }
}

impl LandmarkStrategy for InfoboxTableStrategy {
    fn name(&self) -> &'static str {
        "infobox-table"
    }

    fn extract(&self, document: &Html, hints: &EntityHints) -> ExtractResult<RawFields> {
        let key = hints.key.as_str();

        let basic_table = self
            .reader
            .document_tables(document)
            .find(|table| self.reader.has_header_label(*table, BASIC_INFO_MARKERS))
            .ok_or_else(|| ExtractError::landmark_missing(BASIC_INFO_TABLE, key))?;
        let basic_info = self.reader.labeled_cells(basic_table);
        if basic_info.is_empty() {
            return Err(ExtractError::malformed(BASIC_INFO_TABLE, key, "no label/value rows"));
        }

        let leveled = read_leveled_row(
            self.reader
                .document_tables(document)
                .map(|table| self.reader.rows(table)),
            &self.reference_level,
            None,
            key,
        )?;

        let description = pick_description(
            document.select(&self.paragraphs).map(element_text),
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
