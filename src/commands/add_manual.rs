use anyhow::Result;
use chrono::Utc;

use crate::commands::{CommandReport, find_community};
use crate::rolesync::config::{ConfigProvider, FileConfigProvider};
use crate::rolesync::handle::Handle;
use crate::rolesync::ledger::{ManualEntry, column_letter, write_manual_entry};
use crate::rolesync::page::select_current_page;
use crate::rolesync::paths::resolve_paths;
use crate::sheets::SheetsClient;

#[derive(Debug, Clone)]
pub struct AddManualOptions {
    pub community: String,
    pub handle: String,
    pub user_id: String,
    pub plan: i64,
    pub proof: String,
    pub verified_by: String,
}

fn validate(opts: &AddManualOptions, report: &mut CommandReport) {
    if Handle::parse(opts.handle.trim()).is_blank() {
        report.issue("handle cannot be empty");
    }
    if opts.user_id.trim().is_empty() || !opts.user_id.trim().chars().all(|c| c.is_ascii_digit()) {
        report.issue(format!("user id `{}` must be numeric", opts.user_id));
    }
    if opts.plan <= 0 {
        report.issue(format!("plan must be >= 1 (got {})", opts.plan));
    }
    if opts.verified_by.trim().is_empty() {
        report.issue("verified-by cannot be empty");
    }
}

pub fn run(opts: &AddManualOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("add-manual");
    validate(opts, &mut report);
    if !report.ok {
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let snapshot = FileConfigProvider::new(paths).snapshot()?;
    let Some(community) = find_community(&snapshot, &opts.community, &mut report) else {
        return Ok(report);
    };
    let Some(ledger_id) = community.ledger_id.as_deref() else {
        report.issue("ledger_id is not configured");
        return Ok(report);
    };

    let ledger = SheetsClient::from_env()?;
    let now = Utc::now();
    let current = match select_current_page(&ledger, ledger_id, &snapshot.clock, now) {
        Ok(current) => current,
        Err(err) => {
            report.error_issue("current page", &err);
            return Ok(report);
        }
    };

    let entry = ManualEntry {
        handle: opts.handle.trim().to_string(),
        user_id: opts.user_id.trim().to_string(),
        timestamp: now
            .with_timezone(&snapshot.clock.timezone)
            .format(&snapshot.clock.time_format)
            .to_string(),
        proof: opts.proof.trim().to_string(),
        plan_level: opts.plan,
        verified_by: opts.verified_by.trim().to_string(),
    };
    let color = community.policy.highlight_for(opts.plan);
    let cell = write_manual_entry(&ledger, ledger_id, &current.page, &entry, color)?;

    tracing::info!(
        community_id = %opts.community,
        user_id = %entry.user_id,
        page = %current.page.title,
        row = cell.sheet_row(),
        "manual verification written"
    );
    report.detail(format!("page={}", current.page.title));
    report.detail(format!(
        "range={}{row}:{}{row}",
        column_letter(cell.col_start),
        column_letter(cell.col_end - 1),
        row = cell.sheet_row()
    ));
    report.detail(format!(
        "color={}",
        color.map(|c| c.label()).unwrap_or("none")
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> AddManualOptions {
        AddManualOptions {
            community: "42".into(),
            handle: "foo#0001".into(),
            user_id: "1234".into(),
            plan: 1500,
            proof: String::new(),
            verified_by: "mod#0002".into(),
        }
    }

    #[test]
    fn accepts_complete_entry() {
        let mut report = CommandReport::new("add-manual");
        validate(&opts(), &mut report);
        assert!(report.ok);
    }

    #[test]
    fn rejects_bad_fields() {
        let mut report = CommandReport::new("add-manual");
        validate(
            &AddManualOptions {
                user_id: "abc".into(),
                plan: 0,
                ..opts()
            },
            &mut report,
        );
        assert_eq!(report.issues.len(), 2);
    }
}
