//! Post-reconcile bookkeeping: ledger cosmetics and the operator summary.
//! Everything here is best-effort; failures are logged and counted, never
//! propagated.

use crate::rolesync::directory::ChatDirectory;
use crate::rolesync::ledger::{CellHighlight, LedgerPage, LedgerSource, handle_cell_range};
use crate::rolesync::reconcile::{HandleCorrection, ReconciliationResult};
use crate::rolesync::tier::TierPolicy;
use crate::rolesync::util::truncate_with_ellipsis;

const MAX_LISTED_FAILURES: usize = 20;
const MAX_ERROR_CHARS: usize = 120;
/// Discord rejects messages over 2000 characters.
const MAX_MESSAGE_CHARS: usize = 1900;

/// Sends every highlight in one batch. Returns whether the batch landed.
pub fn flush_highlights(
    source: &dyn LedgerSource,
    ledger_id: &str,
    highlights: &[CellHighlight],
) -> bool {
    if highlights.is_empty() {
        return true;
    }
    match source.batch_format_cells(ledger_id, highlights) {
        Ok(()) => {
            tracing::debug!(ledger_id, cells = highlights.len(), "flushed cell highlights");
            true
        }
        Err(err) => {
            tracing::warn!(
                ledger_id,
                cells = highlights.len(),
                error = %format!("{err:#}"),
                "cell highlight batch failed"
            );
            false
        }
    }
}

/// Rewrites stale handle cells. Returns how many writes succeeded.
pub fn apply_handle_corrections(
    source: &dyn LedgerSource,
    ledger_id: &str,
    page: &LedgerPage,
    corrections: &[HandleCorrection],
) -> usize {
    let mut applied = 0;
    for correction in corrections {
        let Some(range) = handle_cell_range(&correction.record) else {
            continue;
        };
        match source.write_range(
            ledger_id,
            page,
            &range,
            vec![vec![correction.live_handle.clone()]],
        ) {
            Ok(()) => applied += 1,
            Err(err) => tracing::warn!(
                ledger_id,
                range = %range,
                user_id = %correction.record.user_id,
                error = %format!("{err:#}"),
                "handle write-back failed"
            ),
        }
    }
    applied
}

pub fn summary_text(
    community_id: &str,
    page_title: &str,
    policy: &TierPolicy,
    result: &ReconciliationResult,
    dry_run: bool,
) -> String {
    let mut lines = Vec::new();
    let prefix = if dry_run { "[dry-run] " } else { "" };
    lines.push(format!(
        "{prefix}role sync community={community_id} page={page_title} members={}",
        result.members_seen
    ));
    for role in policy.tier_roles() {
        let granted = result.granted.get(role).map(Vec::len).unwrap_or(0);
        lines.push(format!("granted role={role} count={granted}"));
    }
    lines.push(format!(
        "removed={} banned={} demoted={}",
        result.removed.len(),
        result.removed_for_ban.len(),
        result.demoted.len()
    ));
    lines.push(format!("failures={}", result.failures.len()));
    for failure in result.failures.iter().take(MAX_LISTED_FAILURES) {
        let row = failure
            .member
            .cell
            .map(|c| c.sheet_row().to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "  {} {} role={} row={row}: {}",
            failure.member.handle,
            failure.kind.label(),
            failure.role_id,
            truncate_with_ellipsis(&failure.error, MAX_ERROR_CHARS)
        ));
    }
    if result.failures.len() > MAX_LISTED_FAILURES {
        lines.push(format!(
            "  ... {} more",
            result.failures.len() - MAX_LISTED_FAILURES
        ));
    }
    lines.join("\n")
}

/// Posts the summary when a report channel is configured.
pub fn post_summary(directory: &dyn ChatDirectory, channel_id: Option<&str>, text: &str) -> bool {
    let Some(channel_id) = channel_id else {
        return false;
    };
    let body = truncate_message(text);
    match directory.send_message(channel_id, &body) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(channel_id, error = %format!("{err:#}"), "report post failed");
            false
        }
    }
}

fn truncate_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    cut.push('…');
    cut
}
