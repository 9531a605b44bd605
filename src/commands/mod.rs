pub mod add_manual;
pub mod status;
pub mod sync_dry_run;
pub mod sync_status;
pub mod sync_watch;

use serde::Serialize;

use crate::error::classify;
use crate::rolesync::config::{CommunityState, ConfigSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Records `err` as an issue, prefixed with its sync error code when it has one.
    pub fn error_issue(&mut self, context: &str, err: &anyhow::Error) {
        match classify(err) {
            Some(code) => self.issue(format!("{context}: {} {err:#}", code.as_str())),
            None => self.issue(format!("{context}: {err:#}")),
        }
    }
}

/// Looks up `community_id` in the snapshot, recording an issue when absent.
pub fn find_community(
    snapshot: &ConfigSnapshot,
    community_id: &str,
    report: &mut CommandReport,
) -> Option<CommunityState> {
    let found = snapshot.community(community_id).cloned();
    if found.is_none() {
        report.issue(format!("community {community_id} is not configured"));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn issue_flips_ok() {
        let mut report = CommandReport::new("status");
        report.detail("a");
        assert!(report.ok);
        report.issue("b");
        assert!(!report.ok);
    }

    #[test]
    fn error_issue_carries_code() {
        let mut report = CommandReport::new("sync-once");
        let err: anyhow::Error = SyncError::PageNotFound {
            ledger_id: "sheet".into(),
        }
        .into();
        report.error_issue("community guild skipped", &err);
        assert!(report.issues[0].starts_with("community guild skipped: E101_PAGE_NOT_FOUND"));
    }
}
