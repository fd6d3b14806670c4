//! Formula installer library.
//!
//! This crate fetches a release artefact described by a formula descriptor,
//! verifies its digest, extracts it into a private staging area, and
//! atomically installs the requested files at their destinations. It is used
//! by the `formula-install` CLI binary and can be consumed programmatically
//! for testing or custom installation workflows.
//!
//! # Modules
//!
//! - [`cancel`] - Cooperative cancellation and deadlines
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Installer configuration from defaults and CLI overrides
//! - [`descriptor`] - Formula descriptors, URL templating, and validation
//! - [`digest`] - Digest algorithms and expected digests
//! - [`dirs`] - Directory resolution abstraction for platform-specific paths
//! - [`error`] - Composed error type and flattened error kinds
//! - [`extract`] - Archive formats and traversal-safe extraction
//! - [`fetch`] - HTTP download with retry, backoff, and size limits
//! - [`lock`] - Advisory locks on destination directories
//! - [`orchestrator`] - The fetch, verify, extract, install state machine
//! - [`output`] - User-facing progress and summary formatting
//! - [`placement`] - Atomic placement with rollback
//! - [`staging`] - Per-install staging directories
//! - [`verify`] - Digest verification of fetched payloads

pub mod cancel;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod digest;
pub mod dirs;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lock;
pub mod orchestrator;
pub mod output;
pub mod placement;
pub mod staging;
pub mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use error::{ErrorKind, InstallError, Result};
pub use orchestrator::{InstallOutcome, InstallRequest, run_install};
