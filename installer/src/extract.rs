//! Archive extraction into a staging directory.
//!
//! Supports `.tar.gz`, `.tar.zst`, plain `.tar`, and `.zip` payloads. Every
//! entry path is validated before anything is written, so absolute paths,
//! `..` components, and links pointing outside the archive are rejected as
//! path traversal (zip-slip). Entries are unpacked into a `.partial`
//! directory that is renamed to its final name only once every entry has
//! succeeded.

use crate::verify::VerifiedPayload;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use url::Url;

/// Final name of the extracted tree inside the staging directory.
const PAYLOAD_DIR: &str = "payload";
/// Working name used while extraction is in progress.
const PARTIAL_DIR: &str = "payload.partial";

/// Unix file-type mask and symlink type bits for zip external attributes.
#[cfg(unix)]
const S_IFMT: u32 = 0o170_000;
#[cfg(unix)]
const S_IFLNK: u32 = 0o120_000;

/// Archive container formats.
///
/// # Examples
///
/// ```
/// use formula_installer::extract::ArchiveFormat;
/// use url::Url;
///
/// let url = Url::parse("https://example.test/tool-macos.tar.gz").expect("valid URL");
/// assert_eq!(ArchiveFormat::infer_from_url(&url), ArchiveFormat::TarGz);
/// assert_eq!(ArchiveFormat::from_name("tzst"), ArchiveFormat::TarZst);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArchiveFormat {
    /// Gzip-compressed tar.
    TarGz,
    /// Zstandard-compressed tar.
    TarZst,
    /// Uncompressed tar.
    Tar,
    /// Zip archive.
    Zip,
    /// Any other format name; extraction fails with
    /// [`ExtractError::UnsupportedFormat`].
    Other(String),
}

impl ArchiveFormat {
    /// Parse a format name such as `tar.gz`, `tgz`, or `.zip`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let normalised = name.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalised.as_str() {
            "tar.gz" | "tgz" => Self::TarGz,
            "tar.zst" | "tzst" => Self::TarZst,
            "tar" => Self::Tar,
            "zip" => Self::Zip,
            _ => Self::Other(normalised),
        }
    }

    /// Infer the format from the suffix of the URL's final path segment.
    #[must_use]
    pub fn infer_from_url(url: &Url) -> Self {
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_ascii_lowercase();
        for suffix in ["tar.gz", "tgz", "tar.zst", "tzst", "tar", "zip"] {
            if name.ends_with(&format!(".{suffix}")) {
                return Self::from_name(suffix);
            }
        }
        let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
        Self::Other(extension.to_owned())
    }

    /// Return the canonical format name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarZst => "tar.zst",
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ArchiveFormat {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl From<ArchiveFormat> for String {
    fn from(value: ArchiveFormat) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.as_str().is_empty() {
            f.write_str("unknown")
        } else {
            f.write_str(self.as_str())
        }
    }
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The archive format is not supported.
    #[error("unsupported archive format: {format}")]
    UnsupportedFormat {
        /// The rejected format.
        format: ArchiveFormat,
    },

    /// The archive could not be decoded.
    #[error("corrupt archive: {reason}")]
    CorruptArchive {
        /// Description of the decoding failure.
        reason: String,
    },

    /// An entry or link target escapes the extraction directory.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending entry path or link target.
        path: String,
    },

    /// The archive contains no regular files.
    #[error("archive contains no files")]
    EmptyArchive,

    /// Writing the extracted tree failed.
    #[error("extraction I/O error at {path}: {source}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn corrupt(reason: impl fmt::Display) -> Self {
        Self::CorruptArchive {
            reason: reason.to_string(),
        }
    }

    fn traversal(path: &Path) -> Self {
        Self::PathTraversal {
            path: path.display().to_string(),
        }
    }
}

/// An extracted archive inside the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTree {
    /// Directory holding the extracted entries.
    pub root: PathBuf,
    /// Regular files extracted, relative to `root`, in archive order.
    pub files: Vec<PathBuf>,
}

impl ExtractedTree {
    /// Resolve an archive-relative path against the tree root.
    #[must_use]
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

/// Trait for extracting verified payloads, enabling test mocking.
///
/// # Examples
///
/// ```
/// use formula_installer::extract::ArchiveExtractor;
///
/// let extractor = ArchiveExtractor;
/// // Use extractor.extract(&payload, &format, staging_dir) in production
/// # let _ = extractor;
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ArtefactExtractor {
    /// Extract `payload` as `format` into a fresh directory under
    /// `staging_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the format is unsupported, the archive
    /// is corrupt or empty, an entry escapes the destination, or writing
    /// fails. No partial tree is left behind on error.
    fn extract(
        &self,
        payload: &VerifiedPayload,
        format: &ArchiveFormat,
        staging_dir: &Path,
    ) -> Result<ExtractedTree, ExtractError>;
}

/// Default extractor using the `tar`, `flate2`, `zstd`, and `zip` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl ArtefactExtractor for ArchiveExtractor {
    fn extract(
        &self,
        payload: &VerifiedPayload,
        format: &ArchiveFormat,
        staging_dir: &Path,
    ) -> Result<ExtractedTree, ExtractError> {
        if let ArchiveFormat::Other(_) = format {
            return Err(ExtractError::UnsupportedFormat {
                format: format.clone(),
            });
        }

        let partial = staging_dir.join(PARTIAL_DIR);
        let root = staging_dir.join(PAYLOAD_DIR);
        fs::create_dir_all(&partial).map_err(|e| ExtractError::io(&partial, e))?;

        let files = match unpack(payload.bytes(), format, &partial) {
            Ok(files) => files,
            Err(err) => {
                remove_partial(&partial);
                return Err(err);
            }
        };

        fs::rename(&partial, &root).map_err(|e| {
            remove_partial(&partial);
            ExtractError::io(&root, e)
        })?;
        debug!("extracted {} files into {}", files.len(), root.display());
        Ok(ExtractedTree { root, files })
    }
}

fn remove_partial(partial: &Path) {
    if let Err(err) = fs::remove_dir_all(partial) {
        warn!("failed to remove {}: {err}", partial.display());
    }
}

fn unpack(
    bytes: &[u8],
    format: &ArchiveFormat,
    dest: &Path,
) -> Result<Vec<PathBuf>, ExtractError> {
    let files = match format {
        ArchiveFormat::TarGz => unpack_tar(flate2::read::GzDecoder::new(bytes), dest)?,
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(bytes).map_err(ExtractError::corrupt)?;
            unpack_tar(decoder, dest)?
        }
        ArchiveFormat::Tar => unpack_tar(bytes, dest)?,
        ArchiveFormat::Zip => unpack_zip(bytes, dest)?,
        ArchiveFormat::Other(_) => {
            return Err(ExtractError::UnsupportedFormat {
                format: format.clone(),
            });
        }
    };
    if files.is_empty() {
        return Err(ExtractError::EmptyArchive);
    }
    Ok(files)
}

/// Records whether the decoded source stream failed, so unpack errors caused
/// by a corrupt stream are distinguished from destination I/O errors.
struct SourceReader<R> {
    inner: R,
    failed: Rc<Cell<bool>>,
}

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|err| {
            if err.kind() != io::ErrorKind::Interrupted {
                self.failed.set(true);
            }
        })
    }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let failed = Rc::new(Cell::new(false));
    let mut archive = tar::Archive::new(SourceReader {
        inner: reader,
        failed: Rc::clone(&failed),
    });
    let mut files = Vec::new();

    for entry in archive.entries().map_err(ExtractError::corrupt)? {
        let mut entry = entry.map_err(ExtractError::corrupt)?;
        let path = entry.path().map_err(ExtractError::corrupt)?.into_owned();
        validate_entry_path(&path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(ExtractError::corrupt)?
                .ok_or_else(|| {
                    ExtractError::corrupt(format!("link {} has no target", path.display()))
                })?;
            validate_link_target(&target)?;
        } else if !(entry_type.is_file() || entry_type.is_dir()) {
            trace!("skipping {:?} entry {}", entry_type, path.display());
            continue;
        }

        trace!("unpacking {}", path.display());
        let unpacked = entry.unpack_in(dest).map_err(|err| {
            if failed.get() || err.kind() == io::ErrorKind::UnexpectedEof {
                ExtractError::corrupt(err)
            } else {
                ExtractError::io(dest.join(&path), err)
            }
        })?;
        if !unpacked {
            return Err(ExtractError::traversal(&path));
        }
        if entry_type.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn unpack_zip(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(ExtractError::corrupt)?;
    let mut files = Vec::new();

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(ExtractError::corrupt)?;
        let path = file.enclosed_name().ok_or_else(|| ExtractError::PathTraversal {
            path: file.name().to_owned(),
        })?;
        validate_entry_path(&path)?;
        let out = dest.join(&path);

        if file.is_dir() {
            trace!("creating {}", path.display());
            fs::create_dir_all(&out).map_err(|e| ExtractError::io(&out, e))?;
            continue;
        }

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(ExtractError::corrupt)?;
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        #[cfg(unix)]
        {
            if file.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
                let target = PathBuf::from(String::from_utf8_lossy(&contents).into_owned());
                validate_link_target(&target)?;
                trace!("linking {} -> {}", path.display(), target.display());
                std::os::unix::fs::symlink(&target, &out)
                    .map_err(|e| ExtractError::io(&out, e))?;
                continue;
            }
        }

        trace!("writing {}", path.display());
        fs::write(&out, &contents).map_err(|e| ExtractError::io(&out, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))
                    .map_err(|e| ExtractError::io(&out, e))?;
            }
        }
        files.push(path);
    }
    Ok(files)
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractError> {
    if path.has_root() {
        return Err(ExtractError::traversal(path));
    }
    if path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    }) {
        return Err(ExtractError::traversal(path));
    }
    Ok(())
}

/// Link targets must be relative and free of `..`.
fn validate_link_target(target: &Path) -> Result<(), ExtractError> {
    if target.as_os_str().is_empty() {
        return Err(ExtractError::corrupt("link target is empty"));
    }
    validate_entry_path(target)
}

#[cfg(test)]
#[path = "extract_tests.rs"]
mod tests;
