//! Shadow ownership lock
//!
//! An exclusive OS file lock under `supabase/.temp` marks the process that
//! owns the shadow container. The OS releases it when the owner exits, even
//! on SIGKILL, so a running container without a held lock is a leftover.

use crate::error::{AppError, AppResult};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ShadowLock {
    // Keeps the descriptor, and with it the lock, open
    _file: fd_lock::RwLock<File>,
    path: PathBuf,
}

impl ShadowLock {
    /// Take the lock, or `None` while another live process holds it
    pub fn acquire(path: &Path) -> AppResult<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::fs(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| AppError::fs(path, e))?;

        let mut lock = fd_lock::RwLock::new(file);
        let mut guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(AppError::fs(path, e)),
        };

        guard.set_len(0).map_err(|e| AppError::fs(path, e))?;
        writeln!(&mut *guard, "{}", std::process::id()).map_err(|e| AppError::fs(path, e))?;
        // Unlocking on guard drop would end ownership; the lock lives until `_file` closes
        std::mem::forget(guard);

        debug!("Acquired shadow lock {}", path.display());
        Ok(Some(Self {
            _file: lock,
            path: path.to_path_buf(),
        }))
    }

    /// Pid recorded by the current holder, for error messages
    pub fn holder(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Drop for ShadowLock {
    fn drop(&mut self) {
        debug!("Released shadow lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".temp/shadow.lock");

        let first = ShadowLock::acquire(&path).unwrap().unwrap();
        assert_eq!(ShadowLock::holder(&path), Some(std::process::id()));
        assert!(ShadowLock::acquire(&path).unwrap().is_none());

        drop(first);
        assert!(ShadowLock::acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_stale_file_without_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow.lock");
        std::fs::write(&path, "999999\n").unwrap();

        assert!(ShadowLock::acquire(&path).unwrap().is_some());
        assert_eq!(ShadowLock::holder(&path), Some(std::process::id()));
    }
}
