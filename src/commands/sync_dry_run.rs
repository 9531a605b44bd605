use anyhow::Result;
use chrono::Utc;

use crate::commands::{CommandReport, find_community};
use crate::discord::DiscordClient;
use crate::rolesync::config::{ConfigProvider, FileConfigProvider};
use crate::rolesync::paths::resolve_paths;
use crate::rolesync::scheduler::{Collaborators, CycleMode, run_cycle};
use crate::sheets::SheetsClient;

pub fn run(community_id: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync-dry-run");
    let paths = resolve_paths()?;
    let snapshot = FileConfigProvider::new(paths.clone()).snapshot()?;
    let Some(community) = find_community(&snapshot, community_id, &mut report) else {
        return Ok(report);
    };

    let ledger = SheetsClient::from_env()?;
    let directory = DiscordClient::from_env()?;
    let outcome = match run_cycle(
        &community,
        &snapshot.clock,
        Collaborators {
            ledger: &ledger,
            directory: &directory,
        },
        &paths,
        Utc::now(),
        CycleMode::DryRun,
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            report.error_issue(&format!("community {community_id}"), &err);
            return Ok(report);
        }
    };

    report.detail(format!("page={}", outcome.page_title));
    report.detail(format!("removal_active={}", outcome.removal_active));
    report.detail(format!("grant_sync={}", outcome.flags.grant));
    report.detail(format!("removal_sync={}", outcome.flags.remove));
    report.detail(format!("planned_mutations={}", outcome.planned.len()));
    for planned in &outcome.planned {
        report.detail(format!(
            "plan {} user={} handle={} role={}",
            planned.kind.label(),
            planned.user_id,
            planned.handle,
            planned.role_id
        ));
    }
    report.detail(format!(
        "highlights={}",
        outcome.result.highlights.len()
    ));
    report.detail(format!(
        "handle_corrections={}",
        outcome.result.handle_corrections.len()
    ));
    for line in outcome.summary.lines() {
        report.detail(line.to_string());
    }
    Ok(report)
}
