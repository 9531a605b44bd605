use anyhow::Result;
use chrono::Utc;

use crate::commands::CommandReport;
use crate::discord::DiscordClient;
use crate::rolesync::config::{ConfigProvider, FileConfigProvider};
use crate::rolesync::paths::resolve_paths;
use crate::rolesync::scheduler::{self, Collaborators};
use crate::sheets::SheetsClient;

#[derive(Debug, Clone, Default)]
pub struct SyncWatchOptions {
    pub once: bool,
    pub daemon: bool,
}

pub fn run(opts: &SyncWatchOptions) -> Result<CommandReport> {
    let command = if opts.daemon { "sync-watch" } else { "sync-once" };
    let mut report = CommandReport::new(command);

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let provider = FileConfigProvider::new(paths.clone());

    if opts.daemon {
        let ledger = SheetsClient::from_env()?;
        let directory = DiscordClient::from_env()?;
        tracing::info!(config = %paths.config_path.display(), "starting sync scheduler");
        scheduler::run_daemon(
            &provider,
            Collaborators {
                ledger: &ledger,
                directory: &directory,
            },
            &paths,
        )?;
        return Ok(report);
    }

    let snapshot = provider.snapshot()?;
    report.detail(format!("config_path={}", paths.config_path.display()));
    if !snapshot.communities.iter().any(|c| c.sync_enabled()) {
        report.detail("no communities with grant or removal sync enabled");
        return Ok(report);
    }

    let ledger = SheetsClient::from_env()?;
    let directory = DiscordClient::from_env()?;
    let tick = scheduler::run_once(
        &provider,
        Collaborators {
            ledger: &ledger,
            directory: &directory,
        },
        &paths,
        Utc::now(),
    )?;

    report.detail(format!("state_file={}", tick.state_file));
    report.detail(format!("tick_epoch_secs={}", tick.tick_epoch_secs));
    report.detail(format!("poll_interval_secs={}", tick.poll_interval_secs));
    report.detail(format!("disabled_communities={}", tick.disabled_communities));
    for community in &tick.communities {
        if community.outcome.is_some() {
            report.detail(format!(
                "community={} status={} {}",
                community.community_id, community.status, community.message
            ));
        } else {
            report.issue(format!(
                "community={} status={} code={} error={}",
                community.community_id,
                community.status,
                community.error_code.as_deref().unwrap_or("-"),
                community.message
            ));
        }
    }

    Ok(report)
}
