//! Advisory cross-process file locks

use std::fs::{File, OpenOptions};

use fs2::FileExt;

use crate::{Error, NormalizedPath, Result};

/// An exclusive advisory lock held for as long as the value lives.
///
/// Backed by `flock`/`LockFileEx`, so it serializes both separate processes
/// and separate handles within one process.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: NormalizedPath,
}

impl FileLock {
    /// Block until an exclusive lock on `path` is acquired.
    ///
    /// The lock file (and its parent directory) is created if missing.
    pub fn acquire(path: &NormalizedPath) -> Result<Self> {
        let file = Self::open(path)?;
        tracing::trace!(path = %path, "waiting for exclusive lock");
        file.lock_exclusive().map_err(|_| Error::LockFailed {
            path: path.to_native(),
        })?;
        Ok(Self {
            file,
            path: path.clone(),
        })
    }

    /// Try to acquire the lock without blocking.
    ///
    /// Returns `Ok(None)` when another holder owns it.
    pub fn try_acquire(path: &NormalizedPath) -> Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.clone(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(_) => Err(Error::LockFailed {
                path: path.to_native(),
            }),
        }
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    fn open(path: &NormalizedPath) -> Result<File> {
        let native = path.to_native();
        if let Some(parent) = native.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&native)
            .map_err(|e| Error::io(&native, e))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path, error = %e, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_is_refused_until_release() {
        let temp = TempDir::new().unwrap();
        let path = NormalizedPath::new(temp.path()).join("ctx/.lock");

        let held = FileLock::acquire(&path).unwrap();
        assert!(FileLock::try_acquire(&path).unwrap().is_none());

        drop(held);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }
}
