//! Per-install staging directories.

use log::{debug, warn};
use std::io;
use std::path::Path;
use tempfile::TempDir;

/// A uniquely named temporary directory owned by one in-flight install.
///
/// The directory and everything in it are removed when the area is closed
/// or dropped, on success and failure alike.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a staging area for `package` under `parent`, or under the
    /// system temporary directory when `parent` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directory cannot be created.
    pub fn create(parent: Option<&Path>, package: &str) -> io::Result<Self> {
        let prefix = format!(".formula-{}-", sanitise(package));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!("created staging area {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Return the staging directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the staging directory, logging rather than failing on error.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("removed staging area {}", path.display()),
            Err(err) => warn!("failed to remove staging area {}: {err}", path.display()),
        }
    }
}

/// Keep package names safe for use in a directory name.
fn sanitise(package: &str) -> String {
    package
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
