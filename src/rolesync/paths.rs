use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RolesyncPaths {
    pub home: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub locks_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<RolesyncPaths> {
    let home = match env::var("ROLESYNC_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".rolesync"),
    };

    let config_path = env_or_default_path("ROLESYNC_CONFIG_PATH", home.join("rolesync.toml"));
    let state_dir = env_or_default_path("ROLESYNC_STATE_DIR", home.join("state"));
    let logs_dir = env_or_default_path("ROLESYNC_LOGS_DIR", home.join("logs"));
    let locks_dir = home.join("locks");

    Ok(RolesyncPaths {
        home,
        config_path,
        state_dir,
        logs_dir,
        locks_dir,
    })
}

#[cfg(test)]
impl RolesyncPaths {
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            home: root.to_path_buf(),
            config_path: root.join("rolesync.toml"),
            state_dir: root.join("state"),
            logs_dir: root.join("logs"),
            locks_dir: root.join("locks"),
        }
    }
}
