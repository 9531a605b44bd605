//! Current-page selection: the first ledger page whose grant window contains
//! "now" is the active one.

use crate::error::SyncError;
use crate::rolesync::config::ClockSettings;
use crate::rolesync::ledger::{LedgerPage, LedgerSource};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Grant start, remove start and end, top to bottom.
pub const WINDOW_RANGE: &str = "B1:B3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub grant_start: DateTime<Utc>,
    pub remove_start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PageWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.grant_start <= now && now < self.end
    }

    pub fn removal_active(&self, now: DateTime<Utc>) -> bool {
        now > self.remove_start
    }
}

#[derive(Debug, Clone)]
pub struct CurrentPage {
    pub page: LedgerPage,
    pub window: PageWindow,
    pub removal_active: bool,
}

/// Parses a ledger time cell in the community timezone. Unparsable input
/// maps to the minimum representable time, which no window contains as an end.
pub fn parse_ledger_time(raw: &str, clock: &ClockSettings) -> DateTime<Utc> {
    let raw = raw.trim();
    let naive = NaiveDateTime::parse_from_str(raw, &clock.time_format).ok().or_else(|| {
        NaiveDate::parse_from_str(raw, &clock.date_format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    });
    naive
        .and_then(|n| clock.timezone.from_local_datetime(&n).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn format_ledger_time(at: DateTime<Utc>, clock: &ClockSettings) -> String {
    if at == DateTime::<Utc>::MIN_UTC {
        return "unset".to_string();
    }
    at.with_timezone(&clock.timezone)
        .format(&clock.time_format)
        .to_string()
}

pub fn read_window(
    source: &dyn LedgerSource,
    ledger_id: &str,
    page: &LedgerPage,
    clock: &ClockSettings,
) -> Result<PageWindow> {
    let cells = source
        .read_range(ledger_id, page, WINDOW_RANGE)
        .map_err(|err| SyncError::LedgerRead {
            ledger_id: ledger_id.to_string(),
            section: format!("window:{}", page.title),
            reason: format!("{err:#}"),
        })?;
    Ok(PageWindow {
        grant_start: parse_ledger_time(cells.get(0, 0), clock),
        remove_start: parse_ledger_time(cells.get(1, 0), clock),
        end: parse_ledger_time(cells.get(2, 0), clock),
    })
}

pub fn select_current_page(
    source: &dyn LedgerSource,
    ledger_id: &str,
    clock: &ClockSettings,
    now: DateTime<Utc>,
) -> Result<CurrentPage> {
    let pages = source.pages(ledger_id).map_err(|err| SyncError::LedgerRead {
        ledger_id: ledger_id.to_string(),
        section: "pages".to_string(),
        reason: format!("{err:#}"),
    })?;

    for page in pages {
        let window = read_window(source, ledger_id, &page, clock)?;
        if window.contains(now) {
            tracing::debug!(
                ledger_id,
                page = %page.title,
                grant_start = %format_ledger_time(window.grant_start, clock),
                end = %format_ledger_time(window.end, clock),
                "selected current ledger page"
            );
            return Ok(CurrentPage {
                removal_active: window.removal_active(now),
                page,
                window,
            });
        }
    }

    Err(SyncError::PageNotFound {
        ledger_id: ledger_id.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolesync::testing::{FakeLedger, grid};

    fn clock() -> ClockSettings {
        ClockSettings::new("Asia/Tokyo", "%Y/%m/%d %H:%M", "%Y/%m/%d").expect("clock")
    }

    fn page(id: i64, title: &str) -> LedgerPage {
        LedgerPage {
            page_id: id,
            title: title.into(),
            row_count: 100,
        }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        parse_ledger_time(raw, &clock())
    }

    fn ledger_with_two_months() -> FakeLedger {
        let ledger = FakeLedger::default();
        ledger.add_page(page(1, "September"));
        ledger.add_page(page(2, "October"));
        ledger.put_page_range(
            "September",
            WINDOW_RANGE,
            grid(&[&["2026/09/01 00:00"], &["2026/09/05 00:00"], &["2026/10/01 00:00"]]),
        );
        ledger.put_page_range(
            "October",
            WINDOW_RANGE,
            grid(&[&["2026/10/01 00:00"], &["2026/10/05 00:00"], &["2026/11/01 00:00"]]),
        );
        ledger
    }

    #[test]
    fn parses_in_community_timezone() {
        let parsed = at("2026/10/01 09:00");
        assert_eq!(parsed.to_rfc3339(), "2026-10-01T00:00:00+00:00");
    }

    #[test]
    fn date_only_cells_fall_back_to_midnight() {
        assert_eq!(at("2026/10/01"), at("2026/10/01 00:00"));
    }

    #[test]
    fn garbage_parses_to_minimum_time() {
        assert_eq!(at("next tuesday"), DateTime::<Utc>::MIN_UTC);
        assert_eq!(format_ledger_time(at(""), &clock()), "unset");
    }

    #[test]
    fn window_start_is_inclusive_and_end_exclusive() {
        let window = PageWindow {
            grant_start: at("2026/10/01 00:00"),
            remove_start: at("2026/10/05 00:00"),
            end: at("2026/11/01 00:00"),
        };
        assert!(window.contains(at("2026/10/01 00:00")));
        assert!(window.contains(at("2026/10/31 23:59")));
        assert!(!window.contains(at("2026/11/01 00:00")));
        assert!(!window.contains(at("2026/09/30 23:59")));
    }

    #[test]
    fn selects_page_containing_now_and_reports_removal_delay() {
        let ledger = ledger_with_two_months();

        let early = select_current_page(&ledger, "sheet", &clock(), at("2026/10/02 12:00"))
            .expect("page");
        assert_eq!(early.page.title, "October");
        assert!(!early.removal_active);

        let later = select_current_page(&ledger, "sheet", &clock(), at("2026/10/06 12:00"))
            .expect("page");
        assert_eq!(later.page.title, "October");
        assert!(later.removal_active);
    }

    #[test]
    fn no_matching_window_is_page_not_found() {
        let ledger = ledger_with_two_months();
        let err = select_current_page(&ledger, "sheet", &clock(), at("2027/01/01 00:00"))
            .expect_err("no page");
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::PageNotFound { .. })
        ));
    }

    #[test]
    fn malformed_end_cell_makes_page_not_current() {
        let ledger = FakeLedger::default();
        ledger.add_page(page(1, "Broken"));
        ledger.put_page_range(
            "Broken",
            WINDOW_RANGE,
            grid(&[&["2026/10/01 00:00"], &["2026/10/05 00:00"], &["soon"]]),
        );
        assert!(select_current_page(&ledger, "sheet", &clock(), at("2026/10/10 00:00")).is_err());
    }
}
