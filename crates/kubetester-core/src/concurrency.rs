use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory lock on one environment's state directory.
///
/// Held for the lifetime of an `up` or `down` so two processes never run
/// sagas against the same state document. Released on drop.
pub struct StateLock {
    lock_file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl StateLock {
    /// Block until the lock is available.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Locked(format!("{}: {e}", lock_path.display())))?;
        Ok(Self {
            lock_file: file,
            path: lock_path.to_path_buf(),
        })
    }

    /// Fail with [`CoreError::Locked`] if another process holds the lock.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            }),
            Err(_) => Err(CoreError::Locked(format!(
                "{} is held by another kubetester process",
                lock_path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
