//! Atomic filesystem primitives
//!
//! Every generated artifact is written to a temporary sibling path and
//! renamed into place, so a failure at any step leaves no partial output.
//! The canonical secret store is additionally guarded by an advisory
//! lockfile so two concurrent invocations cannot both generate secrets
//! for the same environment.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StackError};

/// Write `contents` to `path` atomically via a temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_sibling(path);
    fs::write(&temp_path, contents)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    tracing::debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

/// Atomic write with owner-only permissions, for credential material.
pub fn write_atomic_secret(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_sibling(path);
    fs::write(&temp_path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    tracing::debug!(path = %path.display(), "wrote secret store");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Advisory lock on a store path, held for the lifetime of the guard.
///
/// The lockfile is created with `create_new`, which is atomic on every
/// platform we target. Acquisition retries with bounded backoff and then
/// fails with [`StackError::Lock`]; it never blocks indefinitely.
#[derive(Debug)]
pub struct StoreLock {
    lock_path: PathBuf,
}

impl StoreLock {
    /// Default number of acquisition attempts
    pub const DEFAULT_ATTEMPTS: u32 = 5;
    /// Base backoff between attempts
    pub const BASE_BACKOFF: Duration = Duration::from_millis(100);

    /// Acquire the lock guarding `store_path`, with default retry policy.
    pub fn acquire(store_path: &Path) -> Result<Self> {
        Self::acquire_with(store_path, Self::DEFAULT_ATTEMPTS, Self::BASE_BACKOFF)
    }

    /// Acquire with an explicit attempt count and base backoff.
    pub fn acquire_with(store_path: &Path, attempts: u32, backoff: Duration) -> Result<Self> {
        let lock_path = store_path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        for attempt in 1..=attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => {
                    tracing::debug!(path = %lock_path.display(), "acquired store lock");
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt < attempts {
                        std::thread::sleep(backoff * attempt);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StackError::Lock {
            path: lock_path.display().to_string(),
            attempts,
        })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            tracing::warn!(path = %self.lock_path.display(), "failed to release store lock: {}", e);
        }
    }
}
