//! Ledger Source capability and the reader that turns one ledger page into
//! membership records.
//!
//! Page layout: data rows start at row 7; three side-by-side sections hold
//! automatic entries (`A..D`), manually verified entries (`F..K`) and
//! excluded/banned entries (`M..Q`).

use crate::error::SyncError;
use crate::rolesync::handle::Handle;
use crate::rolesync::tier::HighlightColor;
use anyhow::Result;
use std::collections::HashMap;

pub const FIRST_DATA_ROW: u32 = 7;
pub const DEFAULT_PLAN_LEVEL: i64 = 500;

/// One tab of the ledger spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPage {
    pub page_id: i64,
    pub title: String,
    pub row_count: u32,
}

/// Zero-based, end-exclusive cell rectangle on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub page_id: i64,
    pub row_start: u32,
    pub row_end: u32,
    pub col_start: u32,
    pub col_end: u32,
}

impl CellRange {
    /// One-based sheet row number of the first row.
    pub fn sheet_row(&self) -> u32 {
        self.row_start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellHighlight {
    pub range: CellRange,
    pub color: HighlightColor,
}

/// Rectangular cell values as returned by the ledger; rows may be ragged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellGrid {
    rows: Vec<Vec<String>>,
}

impl CellGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Missing rows or cells read as empty.
    pub fn get(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub trait LedgerSource {
    fn pages(&self, ledger_id: &str) -> Result<Vec<LedgerPage>>;
    /// `range` is an A1 range relative to `page`, e.g. `A7:D120`.
    fn read_range(&self, ledger_id: &str, page: &LedgerPage, range: &str) -> Result<CellGrid>;
    fn write_range(
        &self,
        ledger_id: &str,
        page: &LedgerPage,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()>;
    fn batch_format_cells(&self, ledger_id: &str, highlights: &[CellHighlight]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCategory {
    Automatic,
    Manual,
    Excluded,
}

impl SourceCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::Excluded => "excluded",
        }
    }
}

/// Column geometry of one ledger section.
#[derive(Debug, Clone, Copy)]
pub struct SectionLayout {
    pub category: SourceCategory,
    pub first_col: u32,
    pub last_col: u32,
    pub user_id_col: usize,
    pub plan_col: Option<usize>,
}

pub const AUTOMATIC_SECTION: SectionLayout = SectionLayout {
    category: SourceCategory::Automatic,
    first_col: 0,
    last_col: 3,
    user_id_col: 1,
    plan_col: Some(3),
};

pub const MANUAL_SECTION: SectionLayout = SectionLayout {
    category: SourceCategory::Manual,
    first_col: 5,
    last_col: 10,
    user_id_col: 1,
    plan_col: Some(4),
};

pub const EXCLUDED_SECTION: SectionLayout = SectionLayout {
    category: SourceCategory::Excluded,
    first_col: 12,
    last_col: 16,
    user_id_col: 1,
    plan_col: None,
};

/// Zero-based column index to spreadsheet letters (0 → A, 26 → AA).
pub fn column_letter(index: u32) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

impl SectionLayout {
    pub fn a1_range(&self, last_row: u32) -> String {
        format!(
            "{}{}:{}{}",
            column_letter(self.first_col),
            FIRST_DATA_ROW,
            column_letter(self.last_col),
            last_row.max(FIRST_DATA_ROW)
        )
    }

    pub fn row_range(&self, page: &LedgerPage, sheet_row: u32) -> CellRange {
        CellRange {
            page_id: page.page_id,
            row_start: sheet_row - 1,
            row_end: sheet_row,
            col_start: self.first_col,
            col_end: self.last_col + 1,
        }
    }
}

/// One normalized ledger row. `cell` is write-back geometry only and never
/// takes part in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    pub user_id: String,
    pub handle: Handle,
    pub plan_level: i64,
    pub category: SourceCategory,
    pub timestamp: String,
    pub cell: Option<CellRange>,
}

pub fn parse_plan_level(raw: &str, default_plan_level: i64) -> i64 {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    match cleaned.parse::<i64>() {
        Ok(0) | Err(_) => default_plan_level,
        Ok(v) => v,
    }
}

/// Normalizes the rows of one section. Automatic/manual rows need a
/// non-blank handle; excluded rows also need a discriminator.
pub fn parse_section(
    grid: &CellGrid,
    layout: &SectionLayout,
    page: &LedgerPage,
    default_plan_level: i64,
) -> Vec<MembershipRecord> {
    let mut out = Vec::new();
    for i in 0..grid.row_count() {
        let handle = Handle::parse(grid.get(i, 0).trim());
        if handle.is_blank() {
            continue;
        }
        if layout.category == SourceCategory::Excluded && !handle.has_discriminator() {
            continue;
        }
        let plan_level = match layout.plan_col {
            Some(col) => parse_plan_level(grid.get(i, col), default_plan_level),
            None => 0,
        };
        let sheet_row = FIRST_DATA_ROW + i as u32;
        out.push(MembershipRecord {
            user_id: grid.get(i, layout.user_id_col).trim().to_string(),
            handle,
            plan_level,
            category: layout.category,
            timestamp: grid.get(i, 2).trim().to_string(),
            cell: Some(layout.row_range(page, sheet_row)),
        });
    }
    out
}

pub fn read_section(
    source: &dyn LedgerSource,
    ledger_id: &str,
    page: &LedgerPage,
    layout: &SectionLayout,
    default_plan_level: i64,
) -> Result<Vec<MembershipRecord>> {
    let range = layout.a1_range(page.row_count);
    let grid = source
        .read_range(ledger_id, page, &range)
        .map_err(|err| SyncError::LedgerRead {
            ledger_id: ledger_id.to_string(),
            section: layout.category.label().to_string(),
            reason: format!("{err:#}"),
        })?;
    Ok(parse_section(&grid, layout, page, default_plan_level))
}

/// The three ordered sections of the active page.
#[derive(Debug, Clone, Default)]
pub struct LedgerSections {
    pub automatic: Vec<MembershipRecord>,
    pub manual: Vec<MembershipRecord>,
    pub excluded: Vec<MembershipRecord>,
}

pub fn read_all_sections(
    source: &dyn LedgerSource,
    ledger_id: &str,
    page: &LedgerPage,
    default_plan_level: i64,
) -> Result<LedgerSections> {
    Ok(LedgerSections {
        automatic: read_section(source, ledger_id, page, &AUTOMATIC_SECTION, default_plan_level)?,
        manual: read_section(source, ledger_id, page, &MANUAL_SECTION, default_plan_level)?,
        excluded: read_section(source, ledger_id, page, &EXCLUDED_SECTION, default_plan_level)?,
    })
}

/// Lookup tables keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct LedgerIndex {
    pub entries: HashMap<String, MembershipRecord>,
    pub bans: HashMap<String, MembershipRecord>,
}

/// Later records overwrite earlier ones with the same user id.
pub fn index_by_user_id(records: impl IntoIterator<Item = MembershipRecord>) -> HashMap<String, MembershipRecord> {
    let mut map = HashMap::new();
    for record in records {
        map.insert(record.user_id.clone(), record);
    }
    map
}

impl LedgerSections {
    /// Automatic rows first, then manual rows, so a manual row wins a shared user id.
    pub fn into_index(self) -> LedgerIndex {
        let entries = index_by_user_id(self.automatic.into_iter().chain(self.manual));
        let bans = index_by_user_id(self.excluded);
        LedgerIndex { entries, bans }
    }
}

/// Range for correcting the handle cell of `record` in place.
pub fn handle_cell_range(record: &MembershipRecord) -> Option<String> {
    let cell = record.cell?;
    let col = column_letter(cell.col_start);
    let row = cell.sheet_row();
    Some(format!("{col}{row}:{col}{row}"))
}

/// A manually verified membership to be written into the manual section.
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub handle: String,
    pub user_id: String,
    pub timestamp: String,
    pub proof: String,
    pub plan_level: i64,
    pub verified_by: String,
}

/// Picks the sheet row for `user_id` in the manual section: its existing row,
/// else the first blank row, else the row after the last one read.
pub fn manual_fill_row(user_ids: &CellGrid, user_id: &str) -> u32 {
    let mut first_blank = None;
    for i in 0..user_ids.row_count() {
        let id = user_ids.get(i, 0).trim();
        if id == user_id {
            return FIRST_DATA_ROW + i as u32;
        }
        if id.is_empty() && first_blank.is_none() {
            first_blank = Some(FIRST_DATA_ROW + i as u32);
        }
    }
    first_blank.unwrap_or(FIRST_DATA_ROW + user_ids.row_count() as u32)
}

pub fn write_manual_entry(
    source: &dyn LedgerSource,
    ledger_id: &str,
    page: &LedgerPage,
    entry: &ManualEntry,
    color: Option<HighlightColor>,
) -> Result<CellRange> {
    let id_col = column_letter(MANUAL_SECTION.first_col + MANUAL_SECTION.user_id_col as u32);
    let ids = source.read_range(
        ledger_id,
        page,
        &format!("{id_col}{}:{id_col}{}", FIRST_DATA_ROW, page.row_count.max(FIRST_DATA_ROW)),
    )?;
    let row = manual_fill_row(&ids, &entry.user_id);
    let range = format!(
        "{}{row}:{}{row}",
        column_letter(MANUAL_SECTION.first_col),
        column_letter(MANUAL_SECTION.last_col)
    );
    source.write_range(
        ledger_id,
        page,
        &range,
        vec![vec![
            entry.handle.clone(),
            entry.user_id.clone(),
            entry.timestamp.clone(),
            entry.proof.clone(),
            entry.plan_level.to_string(),
            entry.verified_by.clone(),
        ]],
    )?;

    let cell = MANUAL_SECTION.row_range(page, row);
    if let Some(color) = color {
        source.batch_format_cells(ledger_id, &[CellHighlight { range: cell, color }])?;
    }
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolesync::testing::{FakeLedger, grid};

    fn page() -> LedgerPage {
        LedgerPage {
            page_id: 99,
            title: "2026-10".into(),
            row_count: 40,
        }
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(5), "F");
        assert_eq!(column_letter(16), "Q");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
    }

    #[test]
    fn section_ranges_start_at_first_data_row() {
        assert_eq!(AUTOMATIC_SECTION.a1_range(40), "A7:D40");
        assert_eq!(MANUAL_SECTION.a1_range(40), "F7:K40");
        assert_eq!(EXCLUDED_SECTION.a1_range(40), "M7:Q40");
        assert_eq!(AUTOMATIC_SECTION.a1_range(3), "A7:D7");
    }

    #[test]
    fn plan_level_defaults_on_blank_zero_or_garbage() {
        assert_eq!(parse_plan_level("", 500), 500);
        assert_eq!(parse_plan_level("0", 500), 500);
        assert_eq!(parse_plan_level("abc", 500), 500);
        assert_eq!(parse_plan_level(" 1,500 ", 500), 1500);
        assert_eq!(parse_plan_level("5000", 500), 5000);
    }

    #[test]
    fn automatic_rows_skip_blank_handles_and_record_geometry() {
        let cells = grid(&[
            &["Foo#0001", "111", "2026/10/01 10:00", "1500"],
            &["", "", "", ""],
            &["bar", "222", "", ""],
        ]);
        let records = parse_section(&cells, &AUTOMATIC_SECTION, &page(), 500);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].user_id, "111");
        assert_eq!(records[0].handle, Handle::new("Foo", "0001"));
        assert_eq!(records[0].plan_level, 1500);
        assert_eq!(
            records[0].cell,
            Some(CellRange {
                page_id: 99,
                row_start: 6,
                row_end: 7,
                col_start: 0,
                col_end: 4,
            })
        );

        assert_eq!(records[1].handle, Handle::new("bar", ""));
        assert_eq!(records[1].plan_level, 500);
        assert_eq!(records[1].cell.map(|c| c.sheet_row()), Some(9));
    }

    #[test]
    fn manual_rows_read_plan_from_fifth_column() {
        let cells = grid(&[&["Baz#4321", "333", "t", "proof-url", "5000", "mod"]]);
        let records = parse_section(&cells, &MANUAL_SECTION, &page(), 500);
        assert_eq!(records[0].plan_level, 5000);
        assert_eq!(records[0].category, SourceCategory::Manual);
        assert_eq!(records[0].cell.map(|c| (c.col_start, c.col_end)), Some((5, 11)));
    }

    #[test]
    fn excluded_rows_require_discriminator() {
        let cells = grid(&[&["nodisc", "444"], &["Banned#9999", "555"]]);
        let records = parse_section(&cells, &EXCLUDED_SECTION, &page(), 500);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, "555");
    }

    fn record(user_id: &str, plan: i64, category: SourceCategory) -> MembershipRecord {
        MembershipRecord {
            user_id: user_id.into(),
            handle: Handle::new("x", "0000"),
            plan_level: plan,
            category,
            timestamp: String::new(),
            cell: None,
        }
    }

    #[test]
    fn manual_row_overrides_automatic_row_for_same_user() {
        let sections = LedgerSections {
            automatic: vec![record("1", 500, SourceCategory::Automatic)],
            manual: vec![record("1", 5000, SourceCategory::Manual)],
            excluded: vec![record("2", 0, SourceCategory::Excluded)],
        };
        let index = sections.into_index();
        let entry = &index.entries["1"];
        assert_eq!(entry.category, SourceCategory::Manual);
        assert_eq!(entry.plan_level, 5000);
        assert!(index.bans.contains_key("2"));
        assert!(!index.entries.contains_key("2"));
    }

    #[test]
    fn duplicate_rows_in_one_section_keep_the_last() {
        let map = index_by_user_id(vec![
            record("1", 400, SourceCategory::Automatic),
            record("1", 1500, SourceCategory::Automatic),
        ]);
        assert_eq!(map["1"].plan_level, 1500);
    }

    #[test]
    fn read_all_sections_reads_three_ranges() {
        let ledger = FakeLedger::default();
        ledger.put_range("A7:D40", grid(&[&["Foo#0001", "1", "", "400"]]));
        ledger.put_range("F7:K40", grid(&[&["Bar#0002", "2", "", "", "1500", "mod"]]));
        ledger.put_range("M7:Q40", grid(&[&["Baz#0003", "3", ""]]));

        let sections = read_all_sections(&ledger, "sheet", &page(), 500).expect("read");
        assert_eq!(sections.automatic.len(), 1);
        assert_eq!(sections.manual.len(), 1);
        assert_eq!(sections.excluded.len(), 1);
    }

    #[test]
    fn read_failure_is_a_ledger_read_error() {
        let ledger = FakeLedger::default();
        ledger.fail_reads("quota exceeded");
        let err = read_all_sections(&ledger, "sheet", &page(), 500).expect_err("should fail");
        let sync = err.downcast_ref::<SyncError>().expect("sync error");
        assert!(matches!(sync, SyncError::LedgerRead { section, .. } if section == "automatic"));
    }

    #[test]
    fn handle_cell_points_at_first_column_of_section_row() {
        let mut rec = record("1", 500, SourceCategory::Manual);
        rec.cell = Some(MANUAL_SECTION.row_range(&page(), 12));
        assert_eq!(handle_cell_range(&rec).as_deref(), Some("F12:F12"));
        rec.cell = None;
        assert_eq!(handle_cell_range(&rec), None);
    }

    #[test]
    fn manual_fill_row_prefers_existing_then_blank_then_append() {
        let ids = grid(&[&["10"], &[""], &["20"]]);
        assert_eq!(manual_fill_row(&ids, "20"), 9);
        assert_eq!(manual_fill_row(&ids, "30"), 8);
        let full = grid(&[&["10"], &["20"]]);
        assert_eq!(manual_fill_row(&full, "30"), 9);
    }

    #[test]
    fn write_manual_entry_writes_row_and_colors_it() {
        let ledger = FakeLedger::default();
        ledger.put_range("G7:G40", grid(&[&["10"]]));
        let entry = ManualEntry {
            handle: "New#0042".into(),
            user_id: "42".into(),
            timestamp: "2026/10/19 12:00".into(),
            proof: "https://proof".into(),
            plan_level: 1500,
            verified_by: "mod".into(),
        };
        let cell = write_manual_entry(&ledger, "sheet", &page(), &entry, Some(HighlightColor::Blue))
            .expect("write");
        assert_eq!(cell.sheet_row(), 8);

        let writes = ledger.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "F8:K8");
        assert_eq!(writes[0].1[0][4], "1500");
        let formats = ledger.format_batches();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0][0].color, HighlightColor::Blue);
    }
}
