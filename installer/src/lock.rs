//! Advisory locks on destination directories.
//!
//! Installs that write into the same directory exclude each other with an
//! exclusive `fs2` lock held for the duration of placement. Acquisition
//! never blocks: contention is reported immediately so the caller can fail
//! with a clear error instead of hanging behind another install.

use fs2::FileExt;
use log::{trace, warn};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Errors raised while acquiring an [`InstallLock`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process or install holds the lock.
    #[error("another install holds the lock on {path}")]
    Contended {
        /// The locked directory.
        path: PathBuf,
    },

    /// The lock target could not be opened or locked.
    #[error("failed to lock {path}: {source}")]
    Io {
        /// The directory being locked.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// An exclusive advisory lock on a directory, released on drop.
///
/// # Examples
///
/// ```
/// use formula_installer::lock::InstallLock;
///
/// let dir = tempfile::tempdir().expect("temp dir");
/// let lock = InstallLock::acquire(dir.path()).expect("uncontended");
/// assert!(InstallLock::acquire(dir.path()).is_err());
/// drop(lock);
/// assert!(InstallLock::acquire(dir.path()).is_ok());
/// ```
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
    #[cfg(not(unix))]
    lock_file: PathBuf,
}

impl InstallLock {
    /// Try to take the lock on `dir` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Contended`] when the lock is already held and
    /// [`LockError::Io`] when the directory cannot be opened.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let io_error = |source| LockError::Io {
            path: dir.to_path_buf(),
            source,
        };

        #[cfg(unix)]
        let file = File::open(dir).map_err(io_error)?;
        #[cfg(not(unix))]
        let lock_file = dir.join(".formula-install.lock");
        #[cfg(not(unix))]
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file)
            .map_err(io_error)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                return Err(LockError::Contended {
                    path: dir.to_path_buf(),
                });
            }
            Err(err) => return Err(io_error(err)),
        }
        trace!("locked {}", dir.display());

        Ok(Self {
            file,
            path: dir.to_path_buf(),
            #[cfg(not(unix))]
            lock_file,
        })
    }

    /// Return the locked directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("failed to unlock {}: {err}", self.path.display());
        }
        #[cfg(not(unix))]
        {
            let _ = std::fs::remove_file(&self.lock_file);
        }
        trace!("unlocked {}", self.path.display());
    }
}
