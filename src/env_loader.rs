use std::env;
use std::path::PathBuf;

include!(concat!(env!("OUT_DIR"), "/rolesync_env_allowlist.rs"));

fn fallback_dotenv_path(rolesync_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(home) = rolesync_home {
        return Some(home.join(".env"));
    }
    Some(home_dir?.join(".rolesync/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("ROLESYNC_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

/// Environment keys the binary reads that are currently set to a non-empty value.
pub fn configured_env_keys() -> Vec<&'static str> {
    GENERATED_ROLESYNC_ENV_ALLOWLIST
        .iter()
        .copied()
        .filter(|key| matches!(env::var(key), Ok(v) if !v.trim().is_empty()))
        .collect()
}
