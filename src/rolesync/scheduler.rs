use crate::error::{SyncError, classify};
use crate::rolesync::audit;
use crate::rolesync::config::{ClockSettings, CommunityState, ConfigProvider};
use crate::rolesync::directory::ChatDirectory;
use crate::rolesync::ledger::{LedgerSource, read_all_sections};
use crate::rolesync::lock;
use crate::rolesync::page::select_current_page;
use crate::rolesync::paths::RolesyncPaths;
use crate::rolesync::reconcile::{
    DryRunEffects, LiveEffects, PlannedMutation, ReconciliationResult, SyncFlags, reconcile,
};
use crate::rolesync::report;
use crate::rolesync::state::{self, CommunityCycle, CycleCounts, RolesyncState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::thread;
use std::time::Duration;

const FALLBACK_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    Live,
    DryRun,
}

/// The two remote services one cycle talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub ledger: &'a dyn LedgerSource,
    pub directory: &'a dyn ChatDirectory,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub community_id: String,
    pub mode: CycleMode,
    pub page_title: String,
    pub removal_active: bool,
    pub flags: SyncFlags,
    pub result: ReconciliationResult,
    pub planned: Vec<PlannedMutation>,
    pub highlights_flushed: bool,
    pub handles_corrected: usize,
    pub report_posted: bool,
    pub summary: String,
}

impl CycleOutcome {
    pub fn status(&self) -> &'static str {
        if self.result.failures.is_empty() && self.highlights_flushed {
            "ok"
        } else {
            "degraded"
        }
    }

    pub fn counts(&self) -> CycleCounts {
        CycleCounts {
            members: self.result.members_seen,
            granted: self.result.granted_count(),
            removed: self.result.removed.len(),
            removed_for_ban: self.result.removed_for_ban.len(),
            demoted: self.result.demoted.len(),
            failures: self.result.failures.len(),
        }
    }
}

fn required_ledger_id(community: &CommunityState) -> Result<&str> {
    let ledger_id = community
        .ledger_id
        .as_deref()
        .ok_or_else(|| SyncError::missing_config(&community.community_id, "ledger_id"))?;
    if community.policy.is_empty() {
        return Err(SyncError::missing_config(&community.community_id, "tier roles").into());
    }
    Ok(ledger_id)
}

/// One community's full cycle: page select, ledger read, member listing,
/// reconcile, then ledger cosmetics and the operator report.
///
/// Every fatal cause surfaces before the first role mutation. Dry runs skip
/// the lock and never write to either service.
pub fn run_cycle(
    community: &CommunityState,
    clock: &ClockSettings,
    services: Collaborators<'_>,
    paths: &RolesyncPaths,
    now: DateTime<Utc>,
    mode: CycleMode,
) -> Result<CycleOutcome> {
    let community_id = community.community_id.as_str();
    let ledger_id = required_ledger_id(community)?;

    let _guard = match mode {
        CycleMode::Live => Some(lock::try_acquire(paths, community_id)?),
        CycleMode::DryRun => None,
    };

    let current = select_current_page(services.ledger, ledger_id, clock, now)?;
    let index = read_all_sections(
        services.ledger,
        ledger_id,
        &current.page,
        community.default_plan_level,
    )?
    .into_index();
    let members = services
        .directory
        .list_members(community_id)
        .map_err(|err| SyncError::MemberList {
            community_id: community_id.to_string(),
            reason: format!("{err:#}"),
        })?;

    let flags = SyncFlags::for_cycle(
        community.grant_enabled,
        community.remove_enabled,
        current.removal_active,
    );
    tracing::info!(
        community_id,
        page = %current.page.title,
        members = members.len(),
        entries = index.entries.len(),
        bans = index.bans.len(),
        grant = flags.grant,
        remove = flags.remove,
        dry_run = mode == CycleMode::DryRun,
        "reconciling community"
    );

    let mut outcome = CycleOutcome {
        community_id: community_id.to_string(),
        mode,
        page_title: current.page.title.clone(),
        removal_active: current.removal_active,
        flags,
        result: ReconciliationResult::default(),
        planned: Vec::new(),
        highlights_flushed: true,
        handles_corrected: 0,
        report_posted: false,
        summary: String::new(),
    };

    match mode {
        CycleMode::Live => {
            let mut effects = LiveEffects::new(services.directory, community_id);
            outcome.result = reconcile(&members, &index, &community.policy, flags, &mut effects);
            outcome.highlights_flushed =
                report::flush_highlights(services.ledger, ledger_id, &outcome.result.highlights);
            outcome.handles_corrected = report::apply_handle_corrections(
                services.ledger,
                ledger_id,
                &current.page,
                &outcome.result.handle_corrections,
            );
        }
        CycleMode::DryRun => {
            let mut effects = DryRunEffects::default();
            outcome.result = reconcile(&members, &index, &community.policy, flags, &mut effects);
            outcome.planned = effects.planned;
        }
    }

    outcome.summary = report::summary_text(
        community_id,
        &current.page.title,
        &community.policy,
        &outcome.result,
        mode == CycleMode::DryRun,
    );
    tracing::info!(community_id, "{}", outcome.summary);
    if mode == CycleMode::Live && !outcome.result.is_noop() {
        outcome.report_posted = report::post_summary(
            services.directory,
            community.report_channel.as_deref(),
            &outcome.summary,
        );
    }

    Ok(outcome)
}

#[derive(Debug, Clone)]
pub struct CommunityTick {
    pub community_id: String,
    pub status: String,
    pub error_code: Option<String>,
    pub message: String,
    pub outcome: Option<CycleOutcome>,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick_epoch_secs: u64,
    pub poll_interval_secs: u64,
    pub state_file: String,
    pub disabled_communities: usize,
    pub communities: Vec<CommunityTick>,
}

fn record_audit(paths: &RolesyncPaths, community_id: &str, status: &str, message: &str) {
    if let Err(err) = audit::append_event(paths, &format!("sync:{community_id}"), status, message) {
        tracing::warn!(community_id, error = %format!("{err:#}"), "audit append failed");
    }
}

/// Runs one tick over every community with grant or removal sync enabled.
/// A community that fails is recorded as skipped; the others still run.
pub fn run_once(
    provider: &dyn ConfigProvider,
    services: Collaborators<'_>,
    paths: &RolesyncPaths,
    now: DateTime<Utc>,
) -> Result<TickOutcome> {
    let snapshot = provider.snapshot()?;
    let mut state = state::load(paths).unwrap_or_else(|err| {
        tracing::warn!(error = %format!("{err:#}"), "state unreadable; starting fresh");
        RolesyncState::default()
    });
    let tick_epoch_secs = u64::try_from(now.timestamp()).unwrap_or(0);

    let mut ticks = Vec::new();
    let mut disabled = 0;
    for community in &snapshot.communities {
        if !community.sync_enabled() {
            disabled += 1;
            continue;
        }
        let id = community.community_id.clone();
        let tick = match run_cycle(community, &snapshot.clock, services, paths, now, CycleMode::Live)
        {
            Ok(outcome) => {
                let status = outcome.status().to_string();
                let counts = outcome.counts();
                let message = format!(
                    "page={} granted={} removed={} banned={} demoted={} failures={}",
                    outcome.page_title,
                    counts.granted,
                    counts.removed,
                    counts.removed_for_ban,
                    counts.demoted,
                    counts.failures
                );
                state.communities.insert(
                    id.clone(),
                    CommunityCycle {
                        last_cycle_epoch_secs: tick_epoch_secs,
                        status: status.clone(),
                        page_title: Some(outcome.page_title.clone()),
                        error_code: None,
                        counts,
                    },
                );
                CommunityTick {
                    community_id: id.clone(),
                    status,
                    error_code: None,
                    message,
                    outcome: Some(outcome),
                }
            }
            Err(err) => {
                let code = classify(&err).map(|c| c.as_str().to_string());
                tracing::warn!(
                    community_id = %id,
                    code = code.as_deref().unwrap_or("-"),
                    error = %format!("{err:#}"),
                    "community cycle skipped"
                );
                let previous = state.communities.remove(&id).unwrap_or_default();
                state.communities.insert(
                    id.clone(),
                    CommunityCycle {
                        last_cycle_epoch_secs: tick_epoch_secs,
                        status: "skipped".to_string(),
                        error_code: code.clone(),
                        ..previous
                    },
                );
                CommunityTick {
                    community_id: id.clone(),
                    status: "skipped".to_string(),
                    error_code: code,
                    message: format!("{err:#}"),
                    outcome: None,
                }
            }
        };
        record_audit(paths, &id, &tick.status, &tick.message);
        ticks.push(tick);
    }

    state.last_tick_epoch_secs = tick_epoch_secs;
    let state_file = match state::save(paths, &state) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "state save failed");
            state::state_file_path(paths)
        }
    };

    Ok(TickOutcome {
        tick_epoch_secs,
        poll_interval_secs: snapshot.poll_interval_secs,
        state_file: state_file.display().to_string(),
        disabled_communities: disabled,
        communities: ticks,
    })
}

/// Ticks forever. A failed tick is logged and retried after the last known
/// poll interval.
pub fn run_daemon(
    provider: &dyn ConfigProvider,
    services: Collaborators<'_>,
    paths: &RolesyncPaths,
) -> Result<()> {
    let mut poll_interval_secs = FALLBACK_POLL_INTERVAL_SECS;
    loop {
        match run_once(provider, services, paths, Utc::now()) {
            Ok(tick) => {
                poll_interval_secs = tick.poll_interval_secs;
                tracing::debug!(communities = tick.communities.len(), "tick complete");
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "tick failed");
            }
        }
        thread::sleep(Duration::from_secs(poll_interval_secs));
    }
}
