use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::commands::{CommandReport, find_community};
use crate::rolesync::config::{ConfigProvider, FileConfigProvider};
use crate::rolesync::page::{format_ledger_time, select_current_page};
use crate::rolesync::paths::resolve_paths;
use crate::rolesync::state;
use crate::sheets::SheetsClient;

pub fn run(community_id: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync-status");
    let paths = resolve_paths()?;
    let snapshot = FileConfigProvider::new(paths.clone()).snapshot()?;
    let Some(community) = find_community(&snapshot, community_id, &mut report) else {
        return Ok(report);
    };

    report.detail(format!("community={community_id}"));
    report.detail(format!(
        "ledger_id={}",
        community.ledger_id.as_deref().unwrap_or("-")
    ));
    report.detail(format!("grant_enabled={}", community.grant_enabled));
    report.detail(format!("remove_enabled={}", community.remove_enabled));
    for rule in community.policy.rules() {
        report.detail(format!(
            "tier threshold={} role={} color={}",
            rule.threshold,
            rule.role,
            rule.color.label()
        ));
    }
    if let Some(mute) = &community.policy.mute_role {
        report.detail(format!("mute_role={mute}"));
    }
    if let Some(former) = &community.policy.former_role {
        report.detail(format!("former_role={former}"));
    }

    let saved = state::load(&paths)?;
    match saved.communities.get(community_id) {
        Some(cycle) => {
            let at = DateTime::<Utc>::from_timestamp(
                i64::try_from(cycle.last_cycle_epoch_secs).unwrap_or(0),
                0,
            )
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
            report.detail(format!(
                "last_cycle={} status={} page={} code={}",
                format_ledger_time(at, &snapshot.clock),
                cycle.status,
                cycle.page_title.as_deref().unwrap_or("-"),
                cycle.error_code.as_deref().unwrap_or("-")
            ));
            report.detail(format!(
                "last_counts members={} granted={} removed={} banned={} demoted={} failures={}",
                cycle.counts.members,
                cycle.counts.granted,
                cycle.counts.removed,
                cycle.counts.removed_for_ban,
                cycle.counts.demoted,
                cycle.counts.failures
            ));
        }
        None => report.detail("last_cycle=never"),
    }

    let Some(ledger_id) = community.ledger_id.as_deref() else {
        report.issue("ledger_id is not configured");
        return Ok(report);
    };
    let ledger = match SheetsClient::from_env() {
        Ok(client) => client,
        Err(err) => {
            report.issue(format!("{err:#}"));
            return Ok(report);
        }
    };
    match select_current_page(&ledger, ledger_id, &snapshot.clock, Utc::now()) {
        Ok(current) => {
            report.detail(format!("page={}", current.page.title));
            report.detail(format!(
                "grant_start={}",
                format_ledger_time(current.window.grant_start, &snapshot.clock)
            ));
            report.detail(format!(
                "remove_start={}",
                format_ledger_time(current.window.remove_start, &snapshot.clock)
            ));
            report.detail(format!(
                "end={}",
                format_ledger_time(current.window.end, &snapshot.clock)
            ));
            report.detail(format!("removal_active={}", current.removal_active));
        }
        Err(err) => report.error_issue("current page", &err),
    }

    Ok(report)
}
