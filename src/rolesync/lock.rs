use crate::error::SyncError;
use crate::rolesync::paths::RolesyncPaths;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Holds one community's exclusive cycle lock until dropped.
#[derive(Debug)]
pub struct CycleGuard {
    file: File,
    path: PathBuf,
}

impl CycleGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Bytes outside `[A-Za-z0-9-]` become `_XX`, so distinct ids never share a file.
pub fn lock_path(paths: &RolesyncPaths, community_id: &str) -> PathBuf {
    let mut safe = String::with_capacity(community_id.len());
    for byte in community_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            safe.push(char::from(byte));
        } else {
            safe.push_str(&format!("_{byte:02X}"));
        }
    }
    paths.locks_dir.join(format!("{safe}.lock"))
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Takes the lock without blocking; a held lock is `SyncError::CycleBusy`.
pub fn try_acquire(paths: &RolesyncPaths, community_id: &str) -> Result<CycleGuard> {
    fs::create_dir_all(&paths.locks_dir)
        .with_context(|| format!("failed to create {}", paths.locks_dir.display()))?;
    let path = lock_path(paths, community_id);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(err) if is_contended(&err) => {
            return Err(SyncError::CycleBusy {
                community_id: community_id.to_string(),
            }
            .into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to lock {}", path.display()));
        }
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(CycleGuard { file, path })
}
