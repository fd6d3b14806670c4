//! Directory resolution abstraction for platform-specific paths.
//!
//! The installer only needs two locations from the host: the home directory,
//! which anchors the default destination root, and a per-user cache
//! directory, which hosts staging areas when none is given. Both are
//! reached through [`BaseDirs`] so configuration can be tested without
//! touching the real environment.

use std::path::PathBuf;

/// Application name used for per-user directories.
const APPLICATION: &str = "formula-installer";

/// Platform directory lookups used by the installer.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs {
    /// Return the current user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;

    /// Return the installer's per-user cache directory.
    ///
    /// - Linux: `~/.cache/formula-installer`
    /// - macOS: `~/Library/Caches/formula-installer`
    /// - Windows: `%LOCALAPPDATA%\formula-installer\cache`
    fn installer_cache_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBaseDirs;

impl BaseDirs for SystemBaseDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        directories_next::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
    }

    fn installer_cache_dir(&self) -> Option<PathBuf> {
        directories_next::ProjectDirs::from("", "", APPLICATION)
            .map(|dirs| dirs.cache_dir().to_path_buf())
    }
}
