use crate::rolesync::ledger::DEFAULT_PLAN_LEVEL;
use crate::rolesync::paths::RolesyncPaths;
use crate::rolesync::tier::{TierPolicy, TierRule};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub timezone: String,
    pub time_format: String,
    pub date_format: String,
}

fn default_date_format() -> String {
    "%Y/%m/%d".to_string()
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Tokyo".to_string(),
            time_format: "%Y/%m/%d %H:%M".to_string(),
            date_format: default_date_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    pub ledger_id: Option<String>,
    pub grant_enabled: bool,
    pub remove_enabled: bool,
    pub mute_role: Option<String>,
    pub former_role: Option<String>,
    pub report_channel: Option<String>,
    pub default_plan_level: i64,
    pub tiers: Vec<TierRule>,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            ledger_id: None,
            grant_enabled: false,
            remove_enabled: false,
            mute_role: None,
            former_role: None,
            report_channel: None,
            default_plan_level: DEFAULT_PLAN_LEVEL,
            tiers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesyncConfig {
    pub watcher: WatcherConfig,
    pub clock: ClockConfig,
    pub communities: BTreeMap<String, CommunityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRolesyncConfig {
    watcher: Option<WatcherConfig>,
    clock: Option<ClockConfig>,
    communities: Option<BTreeMap<String, CommunityConfig>>,
}

/// Resolved timezone plus the formats ledger time cells are written in.
#[derive(Debug, Clone)]
pub struct ClockSettings {
    pub timezone: Tz,
    pub time_format: String,
    pub date_format: String,
}

impl ClockSettings {
    pub fn new(timezone: &str, time_format: &str, date_format: &str) -> Result<Self> {
        let tz = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid timezone `{timezone}`: {err}"))?;
        check_format("time format", time_format)?;
        check_format("date format", date_format)?;
        Ok(Self {
            timezone: tz,
            time_format: time_format.to_string(),
            date_format: date_format.to_string(),
        })
    }
}

/// Renders a fixed instant so a bad strftime item fails here instead of
/// panicking inside a later `to_string`.
fn check_format(kind: &str, format: &str) -> Result<()> {
    let mut rendered = String::new();
    write!(rendered, "{}", DateTime::<Utc>::UNIX_EPOCH.format(format))
        .map_err(|_| anyhow!("invalid clock {kind} `{format}`"))
}

/// Immutable per-cycle view of one community's sync settings.
#[derive(Debug, Clone)]
pub struct CommunityState {
    pub community_id: String,
    pub ledger_id: Option<String>,
    pub grant_enabled: bool,
    pub remove_enabled: bool,
    pub policy: TierPolicy,
    pub report_channel: Option<String>,
    pub default_plan_level: i64,
}

impl CommunityState {
    pub fn sync_enabled(&self) -> bool {
        self.grant_enabled || self.remove_enabled
    }

    fn from_config(community_id: &str, cfg: &CommunityConfig) -> Self {
        Self {
            community_id: community_id.to_string(),
            ledger_id: non_empty(cfg.ledger_id.as_deref()),
            grant_enabled: cfg.grant_enabled,
            remove_enabled: cfg.remove_enabled,
            policy: TierPolicy::new(
                cfg.tiers.clone(),
                non_empty(cfg.mute_role.as_deref()),
                non_empty(cfg.former_role.as_deref()),
            ),
            report_channel: non_empty(cfg.report_channel.as_deref()),
            default_plan_level: cfg.default_plan_level,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub poll_interval_secs: u64,
    pub clock: ClockSettings,
    pub communities: Vec<CommunityState>,
}

impl ConfigSnapshot {
    pub fn community(&self, community_id: &str) -> Option<&CommunityState> {
        self.communities
            .iter()
            .find(|c| c.community_id == community_id)
    }
}

/// Source of the per-cycle configuration snapshot.
pub trait ConfigProvider {
    fn snapshot(&self) -> Result<ConfigSnapshot>;
}

/// Re-reads the TOML file and environment on every snapshot.
pub struct FileConfigProvider {
    paths: RolesyncPaths,
}

impl FileConfigProvider {
    pub fn new(paths: RolesyncPaths) -> Self {
        Self { paths }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn snapshot(&self) -> Result<ConfigSnapshot> {
        let cfg = load_config(&self.paths.config_path)?;
        build_snapshot(&cfg)
    }
}

pub fn build_snapshot(cfg: &RolesyncConfig) -> Result<ConfigSnapshot> {
    Ok(ConfigSnapshot {
        poll_interval_secs: cfg.watcher.poll_interval_secs,
        clock: ClockSettings::new(
            &cfg.clock.timezone,
            &cfg.clock.time_format,
            &cfg.clock.date_format,
        )?,
        communities: cfg
            .communities
            .iter()
            .map(|(id, c)| CommunityState::from_config(id, c))
            .collect(),
    })
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &RolesyncConfig) -> Result<()> {
    if cfg.watcher.poll_interval_secs == 0 {
        return Err(anyhow!(
            "invalid watcher poll interval: must be >= 1 second"
        ));
    }
    if cfg.clock.time_format.trim().is_empty() {
        return Err(anyhow!("invalid clock time format: cannot be empty"));
    }
    ClockSettings::new(
        &cfg.clock.timezone,
        &cfg.clock.time_format,
        &cfg.clock.date_format,
    )?;
    for (id, community) in &cfg.communities {
        if community.default_plan_level <= 0 {
            return Err(anyhow!(
                "invalid default plan level for community {id}: must be >= 1"
            ));
        }
        for tier in &community.tiers {
            if tier.threshold < 0 {
                return Err(anyhow!(
                    "invalid tier threshold {} for community {id}: must be >= 0",
                    tier.threshold
                ));
            }
            if tier.role.trim().is_empty() {
                return Err(anyhow!("tier role for community {id} cannot be empty"));
            }
        }
        let policy = TierPolicy::new(community.tiers.clone(), None, None);
        for (key, role) in [
            ("mute_role", &community.mute_role),
            ("former_role", &community.former_role),
        ] {
            if let Some(role) = role
                && policy.is_tier_role(role.trim())
            {
                return Err(anyhow!(
                    "{key} {role} for community {id} is also a tier role"
                ));
            }
        }
    }
    Ok(())
}

pub fn parse_config(raw: &str) -> Result<RolesyncConfig> {
    let parsed: PartialRolesyncConfig = toml::from_str(raw)?;
    let mut cfg = RolesyncConfig::default();
    if let Some(watcher) = parsed.watcher {
        cfg.watcher = watcher;
    }
    if let Some(clock) = parsed.clock {
        cfg.clock = clock;
    }
    if let Some(communities) = parsed.communities {
        cfg.communities = communities;
    }
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut RolesyncConfig) {
    cfg.watcher.poll_interval_secs =
        env_or_u64("ROLESYNC_POLL_INTERVAL_SECS", cfg.watcher.poll_interval_secs);
    cfg.clock.timezone = env_or_string("ROLESYNC_TIMEZONE", &cfg.clock.timezone);
    cfg.clock.time_format = env_or_string("ROLESYNC_TIME_FORMAT", &cfg.clock.time_format);
}

pub fn load_config(path: &Path) -> Result<RolesyncConfig> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)?;
        parse_config(&raw)
            .map_err(|err| anyhow!("failed to parse rolesync config {}: {err}", path.display()))?
    } else {
        RolesyncConfig::default()
    };

    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
