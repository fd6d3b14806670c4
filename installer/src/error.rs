//! Error types for the formula installer.
//!
//! Each pipeline stage has its own error enum; [`InstallError`] composes
//! them and [`InstallError::kind`] flattens the result into an
//! [`ErrorKind`] for callers that branch on the failure category.

use crate::descriptor::DescriptorError;
use crate::extract::ExtractError;
use crate::fetch::{FetchError, FetchErrorKind};
use crate::orchestrator::Phase;
use crate::placement::PlacementError;
use crate::verify::DigestMismatch;
use std::fmt;
use thiserror::Error;

/// Errors that can end an install.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The descriptor failed validation.
    ///
    /// The orchestrator only accepts a validated
    /// [`InstallPlan`](crate::descriptor::InstallPlan), so this variant is
    /// never produced by an install run. It lets callers that load and
    /// install in one function propagate descriptor errors with `?`:
    ///
    /// ```
    /// use formula_installer::descriptor::{Descriptor, InstallPlan};
    /// use formula_installer::{ErrorKind, Result};
    ///
    /// fn plan(input: &str) -> Result<InstallPlan> {
    ///     Ok(Descriptor::from_toml_str(input)?.plan()?)
    /// }
    ///
    /// let err = plan("name = \"tool\"").expect_err("incomplete descriptor");
    /// assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    /// ```
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    /// The artefact could not be downloaded.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The artefact digest did not match; the bytes were discarded.
    #[error("integrity check failed: {0}")]
    DigestMismatch(#[from] DigestMismatch),

    /// The archive could not be extracted.
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    /// The extracted files could not be placed.
    #[error("install failed: {0}")]
    Placement(#[from] PlacementError),

    /// The caller cancelled the install between phases.
    #[error("install cancelled before {phase}")]
    Cancelled {
        /// The phase that was about to start.
        phase: Phase,
    },

    /// The staging directory could not be created.
    #[error("failed to create staging directory: {source}")]
    Staging {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using [`InstallError`].
pub type Result<T> = std::result::Result<T, InstallError>;

/// Flattened failure categories across every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The descriptor is malformed.
    InvalidDescriptor,
    /// A request or body read timed out.
    Timeout,
    /// The connection failed or exceeded the redirect bound.
    ConnectionFailed,
    /// The server answered with a non-success status.
    HttpStatus(u16),
    /// The artefact exceeds the size ceiling.
    TooLarge,
    /// The install was cancelled.
    Cancelled,
    /// A plaintext source or downgrade redirect was refused.
    InsecureTransport,
    /// The artefact digest did not match.
    DigestMismatch,
    /// The archive format is not supported.
    UnsupportedFormat,
    /// The archive could not be decoded.
    CorruptArchive,
    /// An archive entry escapes its directory.
    PathTraversal,
    /// The archive holds no files.
    EmptyArchive,
    /// A destination or source path has the wrong type.
    PathConflict,
    /// Another install holds a destination directory.
    ConcurrentInstall,
    /// A source file is missing from the archive.
    MissingSource,
    /// A filesystem operation failed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidDescriptor => "invalid descriptor",
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection failed",
            Self::HttpStatus(code) => return write!(f, "HTTP status {code}"),
            Self::TooLarge => "artefact too large",
            Self::Cancelled => "cancelled",
            Self::InsecureTransport => "insecure transport",
            Self::DigestMismatch => "digest mismatch",
            Self::UnsupportedFormat => "unsupported format",
            Self::CorruptArchive => "corrupt archive",
            Self::PathTraversal => "path traversal",
            Self::EmptyArchive => "empty archive",
            Self::PathConflict => "path conflict",
            Self::ConcurrentInstall => "concurrent install",
            Self::MissingSource => "missing source",
            Self::Io => "I/O error",
        };
        f.write_str(name)
    }
}

impl From<FetchErrorKind> for ErrorKind {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => Self::Timeout,
            FetchErrorKind::ConnectionFailed => Self::ConnectionFailed,
            FetchErrorKind::HttpStatus(code) => Self::HttpStatus(code),
            FetchErrorKind::TooLarge => Self::TooLarge,
            FetchErrorKind::Cancelled => Self::Cancelled,
            FetchErrorKind::InsecureTransport => Self::InsecureTransport,
        }
    }
}

impl InstallError {
    /// Return the flattened failure category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            Self::Fetch(err) => err.kind().into(),
            Self::DigestMismatch(_) => ErrorKind::DigestMismatch,
            Self::Extract(err) => match err {
                ExtractError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
                ExtractError::CorruptArchive { .. } => ErrorKind::CorruptArchive,
                ExtractError::PathTraversal { .. } => ErrorKind::PathTraversal,
                ExtractError::EmptyArchive => ErrorKind::EmptyArchive,
                ExtractError::Io { .. } => ErrorKind::Io,
            },
            Self::Placement(err) => match err {
                PlacementError::PathConflict { .. } => ErrorKind::PathConflict,
                PlacementError::ConcurrentInstall { .. } => ErrorKind::ConcurrentInstall,
                PlacementError::MissingSource { .. } => ErrorKind::MissingSource,
                PlacementError::Io { .. } => ErrorKind::Io,
            },
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Staging { .. } => ErrorKind::Io,
        }
    }

    /// Return whether running the same install again later may succeed.
    ///
    /// Transient network failures and lock contention qualify; invalid
    /// descriptors, digest mismatches, and hostile archives never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(err) => err.is_retryable(),
            Self::Placement(PlacementError::ConcurrentInstall { .. }) => true,
            _ => false,
        }
    }
}
