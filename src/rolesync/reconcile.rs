//! Role reconciliation: converges every member's tier roles toward what the
//! ledger says they should hold.
//!
//! Per member, the ledger entry and the ban entry are looked up by user id:
//!
//! - entry + ban: every held tier role is revoked (when removal is active);
//!   both ledger rows are highlighted red.
//! - entry only: missing desired roles are granted (unless muted), excess
//!   tier roles are revoked (when removal is active); the row is highlighted
//!   with the member's highest tier color.
//! - no entry: every held tier role is revoked (when removal is active).
//!
//! A failed grant or revoke is recorded and the pass moves on; it never
//! aborts the cycle.

use crate::rolesync::directory::{ChatDirectory, Member};
use crate::rolesync::ledger::{CellHighlight, CellRange, LedgerIndex, MembershipRecord};
use crate::rolesync::tier::{HighlightColor, TierPolicy};
use anyhow::Result;
use std::collections::BTreeMap;

/// How role mutations are carried out.
pub trait RoleEffects {
    fn has_role(&self, member: &Member, role_id: &str) -> bool {
        member.has_role(role_id)
    }
    fn grant(&mut self, member: &Member, role_id: &str) -> Result<()>;
    fn revoke(&mut self, member: &Member, role_id: &str) -> Result<()>;
}

/// Applies mutations through the chat directory.
pub struct LiveEffects<'a> {
    directory: &'a dyn ChatDirectory,
    community_id: &'a str,
}

impl<'a> LiveEffects<'a> {
    pub fn new(directory: &'a dyn ChatDirectory, community_id: &'a str) -> Self {
        Self {
            directory,
            community_id,
        }
    }
}

impl RoleEffects for LiveEffects<'_> {
    fn grant(&mut self, member: &Member, role_id: &str) -> Result<()> {
        self.directory
            .grant_role(self.community_id, &member.user_id, role_id)
    }

    fn revoke(&mut self, member: &Member, role_id: &str) -> Result<()> {
        self.directory
            .revoke_role(self.community_id, &member.user_id, role_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Grant,
    Revoke,
}

impl MutationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Revoke => "revoke",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMutation {
    pub user_id: String,
    pub handle: String,
    pub role_id: String,
    pub kind: MutationKind,
}

/// Records what would change without touching the directory.
#[derive(Debug, Default)]
pub struct DryRunEffects {
    pub planned: Vec<PlannedMutation>,
}

impl DryRunEffects {
    fn plan(&mut self, member: &Member, role_id: &str, kind: MutationKind) {
        self.planned.push(PlannedMutation {
            user_id: member.user_id.clone(),
            handle: member.handle.to_string(),
            role_id: role_id.to_string(),
            kind,
        });
    }
}

impl RoleEffects for DryRunEffects {
    fn grant(&mut self, member: &Member, role_id: &str) -> Result<()> {
        self.plan(member, role_id, MutationKind::Grant);
        Ok(())
    }

    fn revoke(&mut self, member: &Member, role_id: &str) -> Result<()> {
        self.plan(member, role_id, MutationKind::Revoke);
        Ok(())
    }
}

/// Which directions the pass may move roles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFlags {
    pub grant: bool,
    pub remove: bool,
}

impl SyncFlags {
    /// Removal needs both the community toggle and the page's remove window.
    pub fn for_cycle(grant_enabled: bool, remove_enabled: bool, removal_window_open: bool) -> Self {
        Self {
            grant: grant_enabled,
            remove: remove_enabled && removal_window_open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub user_id: String,
    pub handle: String,
    pub cell: Option<CellRange>,
}

impl MemberRef {
    fn from_record(record: &MembershipRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            handle: record.handle.to_string(),
            cell: record.cell,
        }
    }

    fn from_member(member: &Member) -> Self {
        Self {
            user_id: member.user_id.clone(),
            handle: member.handle.to_string(),
            cell: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub member: MemberRef,
    pub role_id: String,
    pub kind: MutationKind,
    pub error: String,
}

/// A ledger handle cell that no longer matches the member's live handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleCorrection {
    pub record: MembershipRecord,
    pub live_handle: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationResult {
    pub members_seen: usize,
    /// Members newly granted each tier role, keyed by role id.
    pub granted: BTreeMap<String, Vec<MemberRef>>,
    /// Members stripped of every tier role.
    pub removed: Vec<MemberRef>,
    /// Ban rows behind removals caused by exclusion.
    pub removed_for_ban: Vec<MemberRef>,
    /// Members who lost tiers above their plan level.
    pub demoted: Vec<MemberRef>,
    pub failures: Vec<MutationFailure>,
    pub highlights: Vec<CellHighlight>,
    pub handle_corrections: Vec<HandleCorrection>,
}

impl ReconciliationResult {
    pub fn granted_count(&self) -> usize {
        self.granted.values().map(Vec::len).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.granted_count() == 0
            && self.removed.is_empty()
            && self.demoted.is_empty()
            && self.failures.is_empty()
    }
}

struct Pass<'p, 'e> {
    policy: &'p TierPolicy,
    flags: SyncFlags,
    effects: &'e mut dyn RoleEffects,
    result: ReconciliationResult,
}

#[derive(Default)]
struct StripOutcome {
    revoked: usize,
    cleared: bool,
}

impl Pass<'_, '_> {
    fn fail(&mut self, who: &MemberRef, role_id: &str, kind: MutationKind, err: anyhow::Error) {
        tracing::warn!(
            user_id = %who.user_id,
            handle = %who.handle,
            role_id,
            action = kind.label(),
            error = %format!("{err:#}"),
            "role mutation failed"
        );
        self.result.failures.push(MutationFailure {
            member: who.clone(),
            role_id: role_id.to_string(),
            kind,
            error: format!("{err:#}"),
        });
    }

    fn held_tier_roles(&self, member: &Member) -> Vec<String> {
        self.policy
            .tier_roles()
            .into_iter()
            .filter(|role| self.effects.has_role(member, role))
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Revokes every held tier role, then lands the member on the former
    /// role when nothing is left.
    fn strip(&mut self, member: &Member, who: &MemberRef) -> StripOutcome {
        let mut outcome = StripOutcome::default();
        if !self.flags.remove {
            return outcome;
        }

        let held = self.held_tier_roles(member);
        let mut still_held = held.len();
        for role in &held {
            match self.effects.revoke(member, role) {
                Ok(()) => {
                    outcome.revoked += 1;
                    still_held -= 1;
                }
                Err(err) => self.fail(who, role, MutationKind::Revoke, err),
            }
        }

        outcome.cleared = outcome.revoked > 0 && still_held == 0;
        if outcome.cleared {
            self.land_on_former_role(member, who);
        }
        outcome
    }

    fn land_on_former_role(&mut self, member: &Member, who: &MemberRef) {
        let Some(former) = self.policy.former_role.clone() else {
            return;
        };
        if self.effects.has_role(member, &former) {
            return;
        }
        if let Err(err) = self.effects.grant(member, &former) {
            self.fail(who, &former, MutationKind::Grant, err);
        }
    }

    fn banned(&mut self, member: &Member, entry: &MembershipRecord, ban: &MembershipRecord) {
        let who = MemberRef::from_record(entry);
        let outcome = self.strip(member, &who);
        if outcome.revoked == 0 {
            return;
        }
        for cell in [entry.cell, ban.cell].into_iter().flatten() {
            self.result.highlights.push(CellHighlight {
                range: cell,
                color: HighlightColor::Red,
            });
        }
        if outcome.cleared {
            self.result.removed.push(who);
        }
        self.result.removed_for_ban.push(MemberRef::from_record(ban));
    }

    fn converge(&mut self, member: &Member, entry: &MembershipRecord) {
        let who = MemberRef::from_record(entry);
        let desired = self.policy.desired_roles(entry.plan_level);
        let muted = self
            .policy
            .mute_role
            .as_deref()
            .is_some_and(|mute| self.effects.has_role(member, mute));

        let mut changed = false;
        let mut revoked_any = false;
        let tier_roles: Vec<String> = self
            .policy
            .tier_roles()
            .into_iter()
            .map(ToOwned::to_owned)
            .collect();
        for role in &tier_roles {
            let held = self.effects.has_role(member, role);
            let wanted = desired.contains(role);
            if wanted && !held {
                if !self.flags.grant || muted {
                    continue;
                }
                match self.effects.grant(member, role) {
                    Ok(()) => {
                        changed = true;
                        self.result
                            .granted
                            .entry(role.clone())
                            .or_default()
                            .push(who.clone());
                    }
                    Err(err) => self.fail(&who, role, MutationKind::Grant, err),
                }
            } else if !wanted && held && self.flags.remove {
                match self.effects.revoke(member, role) {
                    Ok(()) => {
                        changed = true;
                        revoked_any = true;
                    }
                    Err(err) => self.fail(&who, role, MutationKind::Revoke, err),
                }
            }
        }

        if revoked_any {
            self.result.demoted.push(who);
        }
        if changed
            && let (Some(color), Some(cell)) = (self.policy.highlight_for(entry.plan_level), entry.cell)
        {
            self.result.highlights.push(CellHighlight { range: cell, color });
        }
    }

    fn dropped_off(&mut self, member: &Member) {
        let who = MemberRef::from_member(member);
        if self.strip(member, &who).cleared {
            self.result.removed.push(who);
        }
    }

    /// Compares rendered text, since a live `name#0` reads back from the
    /// ledger as a bare username.
    fn note_handle(&mut self, member: &Member, entry: &MembershipRecord) {
        let live_handle = member.handle.to_string();
        if entry.handle.to_string() != live_handle {
            self.result.handle_corrections.push(HandleCorrection {
                record: entry.clone(),
                live_handle,
            });
        }
    }
}

/// Runs one pass over `members` in enumeration order.
pub fn reconcile(
    members: &[Member],
    index: &LedgerIndex,
    policy: &TierPolicy,
    flags: SyncFlags,
    effects: &mut dyn RoleEffects,
) -> ReconciliationResult {
    let mut pass = Pass {
        policy,
        flags,
        effects,
        result: ReconciliationResult::default(),
    };

    for member in members {
        pass.result.members_seen += 1;
        let entry = index.entries.get(&member.user_id);
        let ban = index.bans.get(&member.user_id);
        match (entry, ban) {
            (Some(entry), Some(ban)) => pass.banned(member, entry, ban),
            (Some(entry), None) => pass.converge(member, entry),
            (None, _) => pass.dropped_off(member),
        }
        if let Some(entry) = entry {
            pass.note_handle(member, entry);
        }
    }

    pass.result
}
