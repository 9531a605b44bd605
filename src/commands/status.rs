use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::env_loader::configured_env_keys;
use crate::rolesync::audit::audit_log_path;
use crate::rolesync::config::{CommunityState, build_snapshot, load_config};
use crate::rolesync::paths::resolve_paths;
use crate::rolesync::state::state_file_path;

const CREDENTIAL_KEYS: [&str; 2] = ["ROLESYNC_DISCORD_TOKEN", "ROLESYNC_SHEETS_ACCESS_TOKEN"];

fn credential_present(key: &str) -> bool {
    matches!(env::var(key), Ok(v) if !v.trim().is_empty())
}

/// Problems that would make every cycle for `community` skip.
pub fn community_issues(community: &CommunityState) -> Vec<String> {
    let mut out = Vec::new();
    if !community.sync_enabled() {
        return out;
    }
    if community.ledger_id.is_none() {
        out.push(format!(
            "community {} has sync enabled but no ledger_id",
            community.community_id
        ));
    }
    if community.policy.is_empty() {
        out.push(format!(
            "community {} has sync enabled but no tier roles",
            community.community_id
        ));
    }
    out
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!(
        "config_path={} exists={}",
        paths.config_path.display(),
        paths.config_path.exists()
    ));
    report.detail(format!("state_file={}", state_file_path(&paths).display()));
    report.detail(format!("audit_log={}", audit_log_path(&paths).display()));
    report.detail(format!("env_keys_set={}", configured_env_keys().join(",")));

    let snapshot = match load_config(&paths.config_path).and_then(|cfg| build_snapshot(&cfg)) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            report.issue(format!("config invalid: {err:#}"));
            return Ok(report);
        }
    };

    report.detail(format!("poll_interval_secs={}", snapshot.poll_interval_secs));
    report.detail(format!("timezone={}", snapshot.clock.timezone.name()));
    report.detail(format!("communities={}", snapshot.communities.len()));
    for community in &snapshot.communities {
        report.detail(format!(
            "community={} ledger_id={} grant={} remove={} tiers={} report_channel={}",
            community.community_id,
            community.ledger_id.as_deref().unwrap_or("-"),
            community.grant_enabled,
            community.remove_enabled,
            community.policy.rules().len(),
            community.report_channel.as_deref().unwrap_or("-")
        ));
        for issue in community_issues(community) {
            report.issue(issue);
        }
    }

    if snapshot.communities.iter().any(|c| c.sync_enabled()) {
        for key in CREDENTIAL_KEYS {
            if !credential_present(key) {
                report.issue(format!("{key} is not set"));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolesync::tier::TierPolicy;

    fn community(enabled: bool, ledger: Option<&str>) -> CommunityState {
        CommunityState {
            community_id: "42".into(),
            ledger_id: ledger.map(ToOwned::to_owned),
            grant_enabled: enabled,
            remove_enabled: false,
            policy: TierPolicy::default(),
            report_channel: None,
            default_plan_level: 500,
        }
    }

    #[test]
    fn disabled_community_has_no_issues() {
        assert!(community_issues(&community(false, None)).is_empty());
    }

    #[test]
    fn enabled_community_needs_ledger_and_tiers() {
        let issues = community_issues(&community(true, None));
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("no ledger_id"));
        assert!(issues[1].contains("no tier roles"));
    }
}
