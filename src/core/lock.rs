//! Work directory lock.

use std::fs::{File, OpenOptions};

use fs2::FileExt;
use tracing::warn;

use crate::domain::ProjectDirs;
use crate::errors::{PartsError, Result};

/// Exclusive advisory lock on a work directory, released on drop
#[derive(Debug)]
pub struct WorkDirLock {
    file: File,
}

impl WorkDirLock {
    /// Take the lock without waiting
    pub fn acquire(dirs: &ProjectDirs) -> Result<Self> {
        let lock_path = dirs.lock_path();

        std::fs::create_dir_all(dirs.work_dir()).map_err(|e| PartsError::state(dirs.work_dir(), e))?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| PartsError::state(&lock_path, e))?;

        file.try_lock_exclusive().map_err(|_| PartsError::WorkDirLocked {
            path: dirs.work_dir().to_path_buf(),
        })?;

        Ok(Self { file })
    }
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(error = %e, "Failed to release work directory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp = TempDir::new().unwrap();
        let dirs = ProjectDirs::new(temp.path());

        let held = WorkDirLock::acquire(&dirs).unwrap();
        assert!(matches!(
            WorkDirLock::acquire(&dirs),
            Err(PartsError::WorkDirLocked { .. })
        ));

        drop(held);
        assert!(WorkDirLock::acquire(&dirs).is_ok());
        assert!(!dirs.lock_path().starts_with(dirs.parts_dir()));
    }
}
