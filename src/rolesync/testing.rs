//! In-memory collaborators for engine tests.

use crate::rolesync::directory::{ChatDirectory, Member};
use crate::rolesync::handle::Handle;
use crate::rolesync::ledger::{CellGrid, CellHighlight, LedgerPage, LedgerSource};
use anyhow::{Result, anyhow};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

pub fn grid(rows: &[&[&str]]) -> CellGrid {
    CellGrid::new(
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}

pub fn member(user_id: &str, handle: &str, roles: &[&str]) -> Member {
    Member {
        user_id: user_id.to_string(),
        handle: Handle::parse(handle),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    Grant { user_id: String, role_id: String },
    Revoke { user_id: String, role_id: String },
    Message { channel_id: String, content: String },
}

/// Keeps member roles in memory; grants and revokes mutate them so a second
/// listing reflects the first pass.
#[derive(Default)]
pub struct FakeDirectory {
    members: RefCell<Vec<Member>>,
    calls: RefCell<Vec<DirectoryCall>>,
    failing: RefCell<HashSet<(String, String)>>,
    list_error: RefCell<Option<String>>,
}

impl FakeDirectory {
    pub fn with_members(members: Vec<Member>) -> Self {
        let dir = Self::default();
        *dir.members.borrow_mut() = members;
        dir
    }

    pub fn fail_role(&self, user_id: &str, role_id: &str) {
        self.failing
            .borrow_mut()
            .insert((user_id.to_string(), role_id.to_string()));
    }

    pub fn fail_listing(&self, reason: &str) {
        *self.list_error.borrow_mut() = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn mutation_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| !matches!(c, DirectoryCall::Message { .. }))
            .count()
    }

    pub fn roles_of(&self, user_id: &str) -> Vec<String> {
        self.members
            .borrow()
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }

    fn check(&self, user_id: &str, role_id: &str) -> Result<()> {
        if self
            .failing
            .borrow()
            .contains(&(user_id.to_string(), role_id.to_string()))
        {
            return Err(anyhow!("missing permissions for role {role_id}"));
        }
        Ok(())
    }
}

impl ChatDirectory for FakeDirectory {
    fn list_members(&self, _community_id: &str) -> Result<Vec<Member>> {
        if let Some(reason) = self.list_error.borrow().as_ref() {
            return Err(anyhow!("{reason}"));
        }
        Ok(self.members.borrow().clone())
    }

    fn grant_role(&self, _community_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        self.calls.borrow_mut().push(DirectoryCall::Grant {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        self.check(user_id, role_id)?;
        if let Some(m) = self
            .members
            .borrow_mut()
            .iter_mut()
            .find(|m| m.user_id == user_id)
            && !m.has_role(role_id)
        {
            m.roles.push(role_id.to_string());
        }
        Ok(())
    }

    fn revoke_role(&self, _community_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        self.calls.borrow_mut().push(DirectoryCall::Revoke {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        self.check(user_id, role_id)?;
        if let Some(m) = self
            .members
            .borrow_mut()
            .iter_mut()
            .find(|m| m.user_id == user_id)
        {
            m.roles.retain(|r| r != role_id);
        }
        Ok(())
    }

    fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        self.calls.borrow_mut().push(DirectoryCall::Message {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}

/// Ranges are looked up by `title!range` first, then by bare `range`.
#[derive(Default)]
pub struct FakeLedger {
    pages: RefCell<Vec<LedgerPage>>,
    ranges: RefCell<HashMap<String, CellGrid>>,
    read_error: RefCell<Option<String>>,
    format_error: RefCell<Option<String>>,
    write_error: RefCell<Option<String>>,
    writes: RefCell<Vec<(String, Vec<Vec<String>>)>>,
    formats: RefCell<Vec<Vec<CellHighlight>>>,
}

impl FakeLedger {
    pub fn add_page(&self, page: LedgerPage) {
        self.pages.borrow_mut().push(page);
    }

    pub fn put_range(&self, range: &str, cells: CellGrid) {
        self.ranges.borrow_mut().insert(range.to_string(), cells);
    }

    pub fn put_page_range(&self, title: &str, range: &str, cells: CellGrid) {
        self.ranges
            .borrow_mut()
            .insert(format!("{title}!{range}"), cells);
    }

    pub fn fail_reads(&self, reason: &str) {
        *self.read_error.borrow_mut() = Some(reason.to_string());
    }

    pub fn fail_formatting(&self, reason: &str) {
        *self.format_error.borrow_mut() = Some(reason.to_string());
    }

    pub fn fail_writes(&self, reason: &str) {
        *self.write_error.borrow_mut() = Some(reason.to_string());
    }

    pub fn writes(&self) -> Vec<(String, Vec<Vec<String>>)> {
        self.writes.borrow().clone()
    }

    pub fn format_batches(&self) -> Vec<Vec<CellHighlight>> {
        self.formats.borrow().clone()
    }
}

impl LedgerSource for FakeLedger {
    fn pages(&self, _ledger_id: &str) -> Result<Vec<LedgerPage>> {
        if let Some(reason) = self.read_error.borrow().as_ref() {
            return Err(anyhow!("{reason}"));
        }
        Ok(self.pages.borrow().clone())
    }

    fn read_range(&self, _ledger_id: &str, page: &LedgerPage, range: &str) -> Result<CellGrid> {
        if let Some(reason) = self.read_error.borrow().as_ref() {
            return Err(anyhow!("{reason}"));
        }
        let ranges = self.ranges.borrow();
        let cells = ranges
            .get(&format!("{}!{range}", page.title))
            .or_else(|| ranges.get(range))
            .cloned()
            .unwrap_or_default();
        Ok(cells)
    }

    fn write_range(
        &self,
        _ledger_id: &str,
        _page: &LedgerPage,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()> {
        if let Some(reason) = self.write_error.borrow().as_ref() {
            return Err(anyhow!("{reason}"));
        }
        self.writes.borrow_mut().push((range.to_string(), values));
        Ok(())
    }

    fn batch_format_cells(&self, _ledger_id: &str, highlights: &[CellHighlight]) -> Result<()> {
        if let Some(reason) = self.format_error.borrow().as_ref() {
            return Err(anyhow!("{reason}"));
        }
        self.formats.borrow_mut().push(highlights.to_vec());
        Ok(())
    }
}
