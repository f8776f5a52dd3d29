//! Exclusive directory locking via flock(2).

use std::fs::File;
use std::path::{Path, PathBuf};

use rustix::fs::{flock, FlockOperation};

use dot_common::{DotError, DotResult};

/// An open directory handle holding an exclusive advisory lock.
///
/// Acquisition blocks until the current holder releases the lock or dies.
/// The kernel drops the lock when the handle closes, so a crashed holder
/// cannot leak it to surviving peers. Dropping the guard releases the lock
/// and closes the handle.
#[derive(Debug)]
pub struct LockedDir {
    file: File,
    path: PathBuf,
}

impl LockedDir {
    /// Open `path` and take an exclusive lock on the handle, possibly
    /// blocking indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::LockAcquisition`] if the directory cannot be
    /// opened or the filesystem does not support the lock primitive.
    pub fn open(path: &Path) -> DotResult<Self> {
        let file = File::open(path).map_err(|err| {
            tracing::error!(path = %path.display(), %err, "Failed to open directory for locking");
            DotError::LockAcquisition {
                path: path.to_path_buf(),
                source: err,
            }
        })?;

        flock(&file, FlockOperation::LockExclusive).map_err(|errno| {
            let err = std::io::Error::from(errno);
            tracing::error!(path = %path.display(), %err, "Failed to get exclusive flock");
            DotError::LockAcquisition {
                path: path.to_path_buf(),
                source: err,
            }
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockedDir {
    fn drop(&mut self) {
        // Closing the handle would release the lock anyway; unlocking
        // explicitly lets the failure be noticed and reported.
        if let Err(errno) = flock(&self.file, FlockOperation::Unlock) {
            tracing::error!(
                path = %self.path.display(),
                err = %std::io::Error::from(errno),
                critical = true,
                "Failed to release the directory lock"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_excludes_other_handles_until_dropped() {
        let dir = TempDir::new().unwrap();
        let guard = LockedDir::open(dir.path()).unwrap();

        // A second handle cannot take the lock while the guard is held
        let probe = File::open(dir.path()).unwrap();
        let contended = flock(&probe, FlockOperation::NonBlockingLockExclusive);
        assert!(contended.is_err());

        drop(guard);
        flock(&probe, FlockOperation::NonBlockingLockExclusive).unwrap();
        flock(&probe, FlockOperation::Unlock).unwrap();
    }

    #[test]
    fn reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        drop(LockedDir::open(dir.path()).unwrap());
        drop(LockedDir::open(dir.path()).unwrap());
    }

    #[test]
    fn missing_directory_is_lock_acquisition_failure() {
        let dir = TempDir::new().unwrap();
        let err = LockedDir::open(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, DotError::LockAcquisition { .. }));
    }
}
