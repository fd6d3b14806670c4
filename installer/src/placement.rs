//! Atomic placement of extracted files at their destinations.
//!
//! Placement runs in two phases. First every source is copied into a
//! temporary file beside its destination, given the source's permissions,
//! and synced. Only once every temporary is ready does the commit phase
//! rename them into place, keeping any existing file as a hard-linked
//! backup so the destination path never goes missing. If any commit
//! fails, the journal is replayed in reverse: backups are restored, new
//! files removed, and directories created by the run are removed again. Observers therefore see either the previous tree or the
//! complete new one.

use crate::descriptor::InstallTarget;
use crate::extract::ExtractedTree;
use crate::lock::{InstallLock, LockError};
use log::{debug, trace, warn};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};

/// Errors raised while placing files.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// A path has the wrong type for the install.
    #[error("path conflict at {path}: {reason}")]
    PathConflict {
        /// The conflicting path.
        path: PathBuf,
        /// What was expected there.
        reason: &'static str,
    },

    /// Another install holds a destination directory.
    #[error("another install is writing to {path}")]
    ConcurrentInstall {
        /// The contended directory.
        path: PathBuf,
    },

    /// A target's source file is absent from the extracted tree.
    #[error("archive does not contain {path}")]
    MissingSource {
        /// The missing archive-relative path.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("placement I/O error at {path}: {source}")]
    Io {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl PlacementError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn conflict(path: &Path, reason: &'static str) -> Self {
        Self::PathConflict {
            path: path.to_path_buf(),
            reason,
        }
    }
}

impl From<LockError> for PlacementError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contended { path } => Self::ConcurrentInstall { path },
            LockError::Io { path, source } => Self::Io { path, source },
        }
    }
}

type Result<T> = std::result::Result<T, PlacementError>;

/// One source file and its absolute destination.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    source: PathBuf,
    destination: PathBuf,
}

/// Install every target from `tree` beneath `destination_root`.
///
/// Absolute destinations are re-rooted under `destination_root`. Returns
/// the installed paths in target order.
///
/// # Errors
///
/// Returns [`PlacementError::MissingSource`] when a source is absent from
/// the tree, [`PlacementError::PathConflict`] when a source is not a
/// regular file, a destination is a directory, or a destination parent is
/// not a directory, [`PlacementError::ConcurrentInstall`] when another
/// install holds a destination directory, and [`PlacementError::Io`] on
/// filesystem failures. On any error no destination is modified.
pub fn install(
    tree: &ExtractedTree,
    targets: &[InstallTarget],
    destination_root: &Path,
) -> Result<Vec<PathBuf>> {
    let root = std::path::absolute(destination_root)
        .map_err(|e| PlacementError::io(destination_root, e))?;
    let placements = targets
        .iter()
        .map(|target| resolve(tree, target, &root))
        .collect::<Result<Vec<_>>>()?;

    let mut created = CreatedDirs::default();
    let result = place(&placements, &mut created);
    if result.is_err() {
        created.rollback();
    }
    result
}

fn resolve(tree: &ExtractedTree, target: &InstallTarget, root: &Path) -> Result<Placement> {
    let source = tree.resolve(target.source.as_std_path());
    match fs::metadata(&source) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(PlacementError::conflict(
                &source,
                "staged source is not a regular file",
            ));
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(PlacementError::MissingSource {
                path: target.source.clone().into_std_path_buf(),
            });
        }
        Err(err) => return Err(PlacementError::io(&source, err)),
    }

    let destination = root.join(target.relative_destination().as_std_path());
    check_destination(&destination)?;
    Ok(Placement {
        source,
        destination,
    })
}

/// The nearest existing ancestor must be a directory and the destination
/// itself must not be one.
fn check_destination(destination: &Path) -> Result<()> {
    for ancestor in destination.ancestors().skip(1) {
        match fs::metadata(ancestor) {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => {
                return Err(PlacementError::conflict(
                    ancestor,
                    "a parent path is not a directory",
                ));
            }
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {}
            Err(err) => return Err(PlacementError::io(ancestor, err)),
        }
    }
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => Err(PlacementError::conflict(
            destination,
            "destination is a directory",
        )),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PlacementError::io(destination, err)),
    }
}

fn place(placements: &[Placement], created: &mut CreatedDirs) -> Result<Vec<PathBuf>> {
    let parents = placements
        .iter()
        .map(|placement| parent_of(&placement.destination).map(Path::to_path_buf))
        .collect::<Result<BTreeSet<_>>>()?;
    for parent in &parents {
        created.ensure(parent)?;
    }
    let _locks = parents
        .iter()
        .map(|parent| InstallLock::acquire(parent))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let prepared = prepare_all(placements)?;
    commit_all(prepared)
}

fn parent_of(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| PlacementError::conflict(path, "destination has no parent directory"))
}

/// Directories created by this run, in creation order.
#[derive(Debug, Default)]
struct CreatedDirs(Vec<PathBuf>);

impl CreatedDirs {
    fn ensure(&mut self, dir: &Path) -> Result<()> {
        let missing: Vec<&Path> = dir
            .ancestors()
            .take_while(|ancestor| !ancestor.exists())
            .collect();
        for path in missing.into_iter().rev() {
            match fs::create_dir(path) {
                Ok(()) => {
                    trace!("created directory {}", path.display());
                    self.0.push(path.to_path_buf());
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_dir() => {}
                Err(err) => return Err(PlacementError::io(path, err)),
            }
        }
        Ok(())
    }

    /// Remove created directories, deepest first, leaving any that are no
    /// longer empty.
    fn rollback(self) {
        for dir in self.0.into_iter().rev() {
            if let Err(err) = fs::remove_dir(&dir) {
                trace!("kept directory {}: {err}", dir.display());
            }
        }
    }
}

/// A fully written temporary awaiting its rename.
#[derive(Debug)]
struct Prepared {
    temp: NamedTempFile,
    destination: PathBuf,
}

fn prepare_all(placements: &[Placement]) -> Result<Vec<Prepared>> {
    placements.iter().map(prepare).collect()
}

fn prepare(placement: &Placement) -> Result<Prepared> {
    let destination = &placement.destination;
    let parent = parent_of(destination)?;
    let mut temp = sibling_temp(destination, ".tmp")?;

    let mut source =
        File::open(&placement.source).map_err(|e| PlacementError::io(&placement.source, e))?;
    io::copy(&mut source, temp.as_file_mut()).map_err(|e| PlacementError::io(parent, e))?;
    let permissions = source
        .metadata()
        .map_err(|e| PlacementError::io(&placement.source, e))?
        .permissions();
    temp.as_file()
        .set_permissions(permissions)
        .map_err(|e| PlacementError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| PlacementError::io(temp.path(), e))?;
    trace!("prepared {} for {}", temp.path().display(), destination.display());

    Ok(Prepared {
        temp,
        destination: destination.clone(),
    })
}

/// Create a hidden temporary file next to `destination`.
fn sibling_temp(destination: &Path, suffix: &str) -> Result<NamedTempFile> {
    let parent = parent_of(destination)?;
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(suffix)
        .tempfile_in(parent)
        .map_err(|e| PlacementError::io(parent, e))
}

/// A commit that can be undone.
#[derive(Debug)]
enum Committed {
    /// An existing file was moved to `backup`.
    Replaced { destination: PathBuf, backup: TempPath },
    /// The destination did not exist before.
    Created { destination: PathBuf },
}

impl Committed {
    fn destination(&self) -> &Path {
        match self {
            Self::Replaced { destination, .. } | Self::Created { destination } => destination,
        }
    }

    fn undo(self) {
        match self {
            Self::Replaced {
                destination,
                backup,
            } => {
                if let Err(err) = fs::rename(&backup, &destination) {
                    warn!(
                        "failed to restore {} from {}: {err}",
                        destination.display(),
                        backup.display()
                    );
                    // Keep the backup on disk so the previous file is not lost.
                    let _ = backup.keep();
                }
            }
            Self::Created { destination } => {
                if let Err(err) = fs::remove_file(&destination) {
                    warn!("failed to remove {}: {err}", destination.display());
                }
            }
        }
    }
}

fn commit_all(prepared: Vec<Prepared>) -> Result<Vec<PathBuf>> {
    let mut journal = Vec::with_capacity(prepared.len());
    for item in prepared {
        match commit(item) {
            Ok(committed) => journal.push(committed),
            Err(err) => {
                debug!("rolling back {} committed files", journal.len());
                for committed in journal.into_iter().rev() {
                    committed.undo();
                }
                return Err(err);
            }
        }
    }

    let installed = journal
        .iter()
        .map(|committed| committed.destination().to_path_buf())
        .collect();
    // Dropping the journal deletes the backups.
    drop(journal);
    Ok(installed)
}

fn commit(prepared: Prepared) -> Result<Committed> {
    let Prepared { temp, destination } = prepared;
    let existing = match fs::symlink_metadata(&destination) {
        Ok(meta) if meta.is_dir() => {
            return Err(PlacementError::conflict(
                &destination,
                "destination is a directory",
            ));
        }
        Ok(_) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => return Err(PlacementError::io(&destination, err)),
    };

    if !existing {
        temp.persist(&destination)
            .map_err(|e| PlacementError::io(&destination, e.error))?;
        trace!("installed {}", destination.display());
        return Ok(Committed::Created { destination });
    }

    let backup = back_up(&destination)?;
    if let Err(err) = temp.persist(&destination) {
        if let Err(restore) = fs::rename(&backup, &destination) {
            warn!("failed to restore {}: {restore}", destination.display());
            let _ = backup.keep();
        }
        return Err(PlacementError::io(&destination, err.error));
    }
    trace!("replaced {}", destination.display());
    Ok(Committed::Replaced {
        destination,
        backup,
    })
}

/// Link `destination` to a fresh backup name, leaving it in place.
///
/// The destination keeps existing until the new file is renamed over it.
/// Filesystems without hard links fall back to moving the file aside.
fn back_up(destination: &Path) -> Result<TempPath> {
    let backup = sibling_temp(destination, ".bak")?.into_temp_path();
    fs::remove_file(&backup).map_err(|e| PlacementError::io(&backup, e))?;
    if let Err(err) = fs::hard_link(destination, &backup) {
        debug!(
            "hard link to {} failed ({err}); moving it aside",
            destination.display()
        );
        fs::rename(destination, &backup).map_err(|e| PlacementError::io(destination, e))?;
    }
    Ok(backup)
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod tests;
