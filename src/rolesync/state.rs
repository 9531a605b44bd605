use crate::rolesync::paths::RolesyncPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleCounts {
    pub members: usize,
    pub granted: usize,
    pub removed: usize,
    pub removed_for_ban: usize,
    pub demoted: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityCycle {
    pub last_cycle_epoch_secs: u64,
    pub status: String,
    pub page_title: Option<String>,
    pub error_code: Option<String>,
    pub counts: CycleCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesyncState {
    pub schema_version: u32,
    pub last_tick_epoch_secs: u64,
    pub communities: BTreeMap<String, CommunityCycle>,
}

impl Default for RolesyncState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_tick_epoch_secs: 0,
            communities: BTreeMap::new(),
        }
    }
}

pub fn state_file_path(paths: &RolesyncPaths) -> PathBuf {
    paths.state_dir.join("rolesync_state.json")
}

pub fn load(paths: &RolesyncPaths) -> Result<RolesyncState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(RolesyncState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: RolesyncState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

/// Writes through a sibling temp file so readers never see a torn state.
pub fn save(paths: &RolesyncPaths, state: &RolesyncState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    let data = serde_json::to_string_pretty(state)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&paths.state_dir)
        .with_context(|| format!("failed to stage {}", file.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())?;
    tmp.persist(&file)
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_loads_default() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let state = load(&RolesyncPaths::under(tmp.path())).expect("load");
        assert_eq!(state.schema_version, 1);
        assert!(state.communities.is_empty());
    }

    #[test]
    fn save_then_load_keeps_community_cycles() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = RolesyncPaths::under(tmp.path());
        let mut state = RolesyncState::default();
        state.communities.insert(
            "guild".into(),
            CommunityCycle {
                last_cycle_epoch_secs: 42,
                status: "ok".into(),
                page_title: Some("October".into()),
                error_code: None,
                counts: CycleCounts {
                    granted: 3,
                    ..CycleCounts::default()
                },
            },
        );

        let file = save(&paths, &state).expect("save");
        assert!(file.ends_with("state/rolesync_state.json"));

        let loaded = load(&paths).expect("load");
        let cycle = &loaded.communities["guild"];
        assert_eq!(cycle.page_title.as_deref(), Some("October"));
        assert_eq!(cycle.counts.granted, 3);
    }
}
