//! File-based locking for single-writer safety.
//!
//! Cross-platform (fs2) advisory locks on `<dir>/db.lock`. The same lock
//! doubles as the leader-election primitive: exactly one client per database
//! name holds the exclusive lock at any instant. Lock is released on Drop.

use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;
use crate::error::Result;

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

fn open_lock_file(dir: &Path) -> Result<(std::fs::File, PathBuf)> {
    let path = dir.join(LOCK_FILE);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)?;
    Ok((f, path))
}

/// Acquire the exclusive lock, blocking until it is granted.
pub fn acquire_exclusive(dir: &Path) -> Result<LockGuard> {
    let (file, path) = open_lock_file(dir)?;
    file.lock_exclusive()?;
    Ok(LockGuard { file, path })
}

/// Try to acquire the exclusive lock. Ok(None), если лок уже занят.
pub fn try_acquire_exclusive(dir: &Path) -> Result<Option<LockGuard>> {
    let (file, path) = open_lock_file(dir)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(LockGuard { file, path })),
        Err(_) => Ok(None),
    }
}
