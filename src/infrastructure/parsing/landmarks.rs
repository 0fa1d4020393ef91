//! Landmark helpers shared by the extraction strategies
//!
//! Tables are read into rows of cells with their column spans, so values can
//! be found by header group rather than by absolute index.

use scraper::{ElementRef, Html, Selector};

use crate::domain::{AscensionCell, LabeledCell, LeveledRow};

use super::error::{ExtractError, ExtractResult};

pub const LEVELED_TABLE: &str = "leveled stats table";

/// Header labels that name the secondary-stat column without saying which stat.
const GENERIC_ASCENSION_LABELS: &[&str] = &["突破属性", "突破加成", "副属性", "属性", "ascension", "substat"];

const PLACEHOLDERS: &[&str] = &["", "-", "—", "–", "/", "无", "n/a"];

/// Largest `colspan` honoured; larger values are clamped, as browsers do.
pub const MAX_COLSPAN: usize = 1000;

pub fn compile(css: &str) -> ExtractResult<Selector> {
    Selector::parse(css).map_err(|e| ExtractError::InvalidSelector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// Full-width ASCII forms and the ideographic space folded to ASCII.
pub fn to_half_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of an element, whitespace collapsed.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn is_placeholder(text: &str) -> bool {
    let folded = to_half_width(text).trim().to_lowercase();
    PLACEHOLDERS.contains(&folded.as_str())
}

/// First number in a localized numeral string: full-width digits, thousands
/// separators (`,` `，` spaces) and a trailing `%` are all tolerated.
pub fn parse_localized_number(text: &str) -> Option<f64> {
    let cleaned: String = to_half_width(text)
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}' | '_'))
        .collect();

    let start = cleaned.find(|c: char| c.is_ascii_digit())?;
    let mut end = start;
    let mut seen_dot = false;
    let bytes = cleaned.as_bytes();
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    cleaned[start..end].parse().ok()
}

/// Level cell text with decorations (`级`, `Lv.`, `Lv`, whitespace) removed.
pub fn normalize_level(text: &str) -> String {
    let folded: String = to_half_width(text).chars().filter(|c| !c.is_whitespace()).collect();
    let lowered = folded.to_lowercase();
    let stripped = lowered
        .strip_prefix("lv.")
        .or_else(|| lowered.strip_prefix("lv"))
        .unwrap_or(&lowered);
    stripped.trim_end_matches('级').to_string()
}

pub fn is_level_label(text: &str) -> bool {
    let lowered = to_half_width(text).trim().to_lowercase();
    lowered.contains("等级") || matches!(lowered.as_str(), "lv" | "lv." | "level")
}

pub fn is_level_value(text: &str) -> bool {
    normalize_level(text).starts_with(|c: char| c.is_ascii_digit())
}

const DESCRIPTION_SKIP_MARKERS: &[&str] = &["突破", "材料", "本页面", "编辑", "跳转"];
const MIN_DESCRIPTION_CHARS: usize = 20;

/// First candidate paragraph long enough to be prose and not navigation or
/// material listings, cut to `max_chars` characters.
pub fn pick_description<I>(candidates: I, max_chars: usize) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    candidates
        .into_iter()
        .map(|text| collapse_whitespace(&text))
        .find(|text| {
            text.chars().count() >= MIN_DESCRIPTION_CHARS
                && !DESCRIPTION_SKIP_MARKERS.iter().any(|marker| text.contains(marker))
        })
        .map(|text| text.chars().take(max_chars).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    pub text: String,
    pub header: bool,
    pub span: usize,
}

/// Row and cell selectors, compiled once per strategy.
#[derive(Debug, Clone)]
pub struct TableReader {
    table: Selector,
    row: Selector,
    cell: Selector,
    header_cell: Selector,
    image: Selector,
}

impl TableReader {
    pub fn new() -> ExtractResult<Self> {
        Ok(Self {
            table: compile("table")?,
            row: compile("tr")?,
            cell: compile("th, td")?,
            header_cell: compile("th")?,
            image: compile("img")?,
        })
    }

    pub fn tables<'a>(&'a self, root: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        root.select(&self.table)
    }

    pub fn document_tables<'a>(&'a self, document: &'a Html) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        document.select(&self.table)
    }

    pub fn rows(&self, table: ElementRef<'_>) -> Vec<Vec<GridCell>> {
        table
            .select(&self.row)
            .map(|row| {
                row.select(&self.cell)
                    .map(|cell| GridCell {
                        text: element_text(cell),
                        header: cell.value().name() == "th",
                        span: parse_span(cell.value().attr("colspan")),
                    })
                    .collect()
            })
            .collect()
    }

    /// Whether any `th` in the table carries one of `labels` (exact, or as a
    /// `/`-separated part). `labels` are expected in lowercase.
    pub fn has_header_label(&self, table: ElementRef<'_>, labels: &[&str]) -> bool {
        table.select(&self.header_cell).any(|th| {
            let text = element_text(th).to_lowercase();
            let text = text.trim_end_matches(&[':', '：'][..]);
            labels.contains(&text) || text.split('/').any(|part| labels.contains(&part.trim()))
        })
    }

    /// `th` -> `td` pairs in document order, regardless of row order.
    pub fn labeled_cells(&self, table: ElementRef<'_>) -> Vec<LabeledCell> {
        let mut cells = Vec::new();
        for row in table.select(&self.row) {
            let mut pending_label: Option<String> = None;
            for cell in row.select(&self.cell) {
                if cell.value().name() == "th" {
                    pending_label = Some(element_text(cell));
                    continue;
                }
                let Some(label) = pending_label.take() else {
                    continue;
                };
                let label = label.trim_end_matches(&[':', '：'][..]).trim().to_string();
                if label.is_empty() {
                    continue;
                }
                cells.push(LabeledCell {
                    label,
                    value: element_text(cell),
                    image_alts: self.image_hints(cell),
                });
            }
        }
        cells
    }

    /// `alt` text of images in a cell, or the file name of `src` when alt is empty.
    pub fn image_hints(&self, cell: ElementRef<'_>) -> Vec<String> {
        cell.select(&self.image)
            .filter_map(|img| {
                let alt = img.value().attr("alt").map(str::trim).unwrap_or_default();
                if !alt.is_empty() {
                    return Some(alt.to_string());
                }
                img.value()
                    .attr("src")
                    .and_then(|src| src.rsplit('/').next())
                    .filter(|name| !name.is_empty())
                    .map(ToString::to_string)
            })
            .collect()
    }
}

/// Missing, zero or non-numeric spans count as 1; digit runs too long for
/// `usize` and anything above [`MAX_COLSPAN`] count as [`MAX_COLSPAN`].
pub fn parse_span(raw: Option<&str>) -> usize {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return 1;
    };
    match raw.parse::<usize>() {
        Ok(0) => 1,
        Ok(span) => span.min(MAX_COLSPAN),
        Err(_) if raw.bytes().all(|b| b.is_ascii_digit()) => MAX_COLSPAN,
        Err(_) => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGroup {
    pub label: String,
    pub start: usize,
    pub width: usize,
}

/// Header cells grouped by label: `colspan` widens a group and consecutive
/// cells with the same label merge into one.
pub fn header_groups(header: &[GridCell]) -> Vec<ColumnGroup> {
    let mut groups: Vec<ColumnGroup> = Vec::new();
    let mut column = 0;
    for cell in header {
        match groups.last_mut() {
            Some(last) if last.label == cell.text => last.width = last.width.saturating_add(cell.span),
            _ => groups.push(ColumnGroup {
                label: cell.text.clone(),
                start: column,
                width: cell.span,
            }),
        }
        column = column.saturating_add(cell.span);
    }
    groups
}

/// When the header carries no spans but data rows interleave extra cells
/// (e.g. before/after-ascension pairs), spread the data columns evenly over
/// the non-level groups.
fn fit_groups_to_row(groups: &[ColumnGroup], row_len: usize) -> Vec<ColumnGroup> {
    let header_width = groups.iter().fold(0usize, |width, g| width.saturating_add(g.width));
    let Some(level) = groups.first() else {
        return Vec::new();
    };
    let value_groups = groups.len() - 1;
    let value_columns = row_len.saturating_sub(level.width);
    if row_len <= header_width || value_groups == 0 || value_columns % value_groups != 0 {
        return groups.to_vec();
    }

    let width = value_columns / value_groups;
    let mut fitted = vec![level.clone()];
    let mut start = level.width;
    for group in &groups[1..] {
        fitted.push(ColumnGroup {
            label: group.label.clone(),
            start,
            width,
        });
        start += width;
    }
    fitted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Health,
    Attack,
    Defense,
    Ascension,
}

fn base_stat_role(label: &str) -> Option<ColumnRole> {
    let lowered = to_half_width(label).to_lowercase();
    if lowered.contains("生命") || lowered.contains("hp") {
        Some(ColumnRole::Health)
    } else if lowered.contains("攻击") || lowered.contains("atk") || lowered.contains("attack") {
        Some(ColumnRole::Attack)
    } else if lowered.contains("防御") || lowered.contains("def") {
        Some(ColumnRole::Defense)
    } else {
        None
    }
}

/// Level column first, then base stats in header order; the first header that
/// is not a still-unclaimed base stat (including a repeated one) is the
/// secondary stat.
fn assign_roles(groups: &[ColumnGroup]) -> Vec<(ColumnRole, &ColumnGroup)> {
    let mut assigned: Vec<(ColumnRole, &ColumnGroup)> = Vec::new();
    let taken = |assigned: &[(ColumnRole, &ColumnGroup)], role| assigned.iter().any(|(r, _)| *r == role);

    for group in groups.iter().skip(1) {
        let role = match base_stat_role(&group.label) {
            Some(role) if !taken(&assigned, role) => role,
            _ if !taken(&assigned, ColumnRole::Ascension) => ColumnRole::Ascension,
            _ => continue,
        };
        assigned.push((role, group));
    }
    assigned
}

pub fn is_generic_ascension_label(label: &str) -> bool {
    let lowered = to_half_width(label).trim().to_lowercase();
    GENERIC_ASCENSION_LABELS.contains(&lowered.as_str())
}

/// Locate the leveled table and read the row for `reference_level`.
///
/// `ascension_label` replaces a generic secondary-stat header when the page
/// names the stat elsewhere.
pub fn read_leveled_row(
    tables: impl Iterator<Item = Vec<Vec<GridCell>>>,
    reference_level: &str,
    ascension_label: Option<&str>,
    key: &str,
) -> ExtractResult<LeveledRow> {
    let wanted = normalize_level(reference_level);
    let mut saw_table = false;

    for rows in tables {
        let Some(header_index) = rows
            .iter()
            .position(|row| row.first().is_some_and(|cell| is_level_label(&cell.text)))
        else {
            continue;
        };
        saw_table = true;

        let groups = header_groups(&rows[header_index]);
        let Some(row) = rows[header_index + 1..].iter().find(|row| {
            row.first()
                .is_some_and(|cell| is_level_value(&cell.text) && normalize_level(&cell.text) == wanted)
        }) else {
            continue;
        };

        return leveled_row_values(&groups, row, ascension_label, key);
    }

    if saw_table {
        Err(ExtractError::ReferenceLevelMissing {
            level: reference_level.to_string(),
            key: key.to_string(),
        })
    } else {
        Err(ExtractError::landmark_missing(LEVELED_TABLE, key))
    }
}

fn leveled_row_values(
    groups: &[ColumnGroup],
    row: &[GridCell],
    ascension_label: Option<&str>,
    key: &str,
) -> ExtractResult<LeveledRow> {
    let row_width = row.iter().fold(0usize, |width, cell| width.saturating_add(cell.span));
    if row_width > MAX_COLSPAN {
        return Err(ExtractError::malformed(
            LEVELED_TABLE,
            key,
            format!("row spans {row_width} columns, more than {MAX_COLSPAN}"),
        ));
    }
    // Data rows are expanded cell by cell, so spans in them are flattened.
    let flat: Vec<&GridCell> = row
        .iter()
        .flat_map(|cell| std::iter::repeat_n(cell, cell.span))
        .collect();
    let groups = fit_groups_to_row(groups, flat.len());

    let mut leveled = LeveledRow {
        level: flat.first().map(|c| normalize_level(&c.text)).unwrap_or_default(),
        health: None,
        attack: None,
        defense: None,
        ascension: None,
    };

    for (role, group) in assign_roles(&groups) {
        let end = group.start.saturating_add(group.width).min(flat.len());
        let Some(text) = flat
            .get(group.start..end)
            .and_then(|cells| cells.iter().map(|c| c.text.as_str()).find(|t| !is_placeholder(t)))
        else {
            continue;
        };
        let value = parse_localized_number(text).ok_or_else(|| {
            ExtractError::malformed(LEVELED_TABLE, key, format!("'{text}' under '{}' is not a number", group.label))
        })?;

        match role {
            ColumnRole::Health => leveled.health = Some(value),
            ColumnRole::Attack => leveled.attack = Some(value),
            ColumnRole::Defense => leveled.defense = Some(value),
            ColumnRole::Ascension => {
                let label = match ascension_label {
                    Some(named) if is_generic_ascension_label(&group.label) => named.to_string(),
                    _ => group.label.clone(),
                };
                leveled.ascension = Some(AscensionCell { label, value });
            }
        }
    }

    Ok(leveled)
}
