//! Install orchestration: fetch → verify → extract → install.
//!
//! An [`Orchestrator`] drives one install through a strictly forward state
//! machine:
//!
//! ```text
//! Idle → Fetching → Verifying → Extracting → Installing → Done(Success)
//!            └───────────┴───────────┴────────────┴─────→ Done(Failed)
//! ```
//!
//! The staging directory is created on entry to `Fetching` and removed
//! before `Done` in both branches. Cancellation is checked between phases
//! and inside the fetcher. The orchestrator is consumed by
//! [`Orchestrator::run`], so it cannot be reused.

use crate::cancel::CancelToken;
use crate::descriptor::InstallPlan;
use crate::error::InstallError;
use crate::extract::{ArchiveExtractor, ArtefactExtractor};
use crate::fetch::{ArtefactFetcher, FetchPolicy, RetryingFetcher};
use crate::placement;
use crate::staging::StagingArea;
use crate::verify::verify;
use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};

/// A pipeline phase, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Downloading the artefact.
    Fetching,
    /// Checking the artefact digest.
    Verifying,
    /// Unpacking the archive into staging.
    Extracting,
    /// Placing files at their destinations.
    Installing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::Extracting => "extracting",
            Self::Installing => "installing",
        })
    }
}

/// How a finished install ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    /// Every target was installed.
    Success,
    /// The install failed during the given phase.
    Failed(Phase),
}

/// Orchestrator states, reported to the transition observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Not yet started.
    Idle,
    /// Downloading the artefact.
    Fetching,
    /// Checking the artefact digest.
    Verifying,
    /// Unpacking into staging.
    Extracting,
    /// Placing files.
    Installing,
    /// Finished.
    Done(InstallStatus),
}

impl From<Phase> for InstallState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Fetching => Self::Fetching,
            Phase::Verifying => Self::Verifying,
            Phase::Extracting => Self::Extracting,
            Phase::Installing => Self::Installing,
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Fetching => fmt::Display::fmt(&Phase::Fetching, f),
            Self::Verifying => fmt::Display::fmt(&Phase::Verifying, f),
            Self::Extracting => fmt::Display::fmt(&Phase::Extracting, f),
            Self::Installing => fmt::Display::fmt(&Phase::Installing, f),
            Self::Done(InstallStatus::Success) => f.write_str("done"),
            Self::Done(InstallStatus::Failed(phase)) => write!(f, "failed while {phase}"),
        }
    }
}

/// The terminal result of an install.
#[derive(Debug)]
pub enum InstallOutcome {
    /// Every target was installed.
    Success {
        /// Installed destination paths, in target order.
        installed: Vec<PathBuf>,
    },
    /// The install failed; no destination was modified.
    Failed {
        /// The phase the failure occurred in.
        phase: Phase,
        /// The originating error.
        error: InstallError,
    },
}

impl InstallOutcome {
    /// Return whether the install succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Convert into a `Result`, dropping the failing phase.
    ///
    /// # Errors
    ///
    /// Returns the originating [`InstallError`] for a failed install.
    pub fn into_result(self) -> Result<Vec<PathBuf>, InstallError> {
        match self {
            Self::Success { installed } => Ok(installed),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Inputs for one install.
#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
    /// The validated plan.
    pub plan: &'a InstallPlan,
    /// Root beneath which destinations are resolved.
    pub destination_root: &'a Path,
    /// Parent for the staging directory; the system temporary directory
    /// when `None`.
    pub staging_parent: Option<&'a Path>,
    /// Cancellation signal shared with the caller.
    pub cancel: CancelToken,
}

type Observer<'a> = Box<dyn FnMut(&InstallState) + 'a>;

/// Drives a single install through its phases.
pub struct Orchestrator<'a> {
    request: InstallRequest<'a>,
    fetcher: &'a dyn ArtefactFetcher,
    extractor: &'a dyn ArtefactExtractor,
    observer: Option<Observer<'a>>,
    state: InstallState,
}

impl fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("request", &self.request)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

type PhaseResult<T> = Result<T, (Phase, InstallError)>;

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator in the `Idle` state.
    #[must_use]
    pub fn new(
        request: InstallRequest<'a>,
        fetcher: &'a dyn ArtefactFetcher,
        extractor: &'a dyn ArtefactExtractor,
    ) -> Self {
        Self {
            request,
            fetcher,
            extractor,
            observer: None,
            state: InstallState::Idle,
        }
    }

    /// Register a callback that receives every state change.
    #[must_use]
    pub fn with_observer(mut self, observer: impl FnMut(&InstallState) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Return the current state.
    #[must_use]
    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Run the install to completion.
    pub fn run(mut self) -> InstallOutcome {
        let (status, outcome) = match self.execute() {
            Ok(installed) => (InstallStatus::Success, InstallOutcome::Success { installed }),
            Err((phase, error)) => {
                debug!("{} failed while {phase}: {error}", self.request.plan.name());
                (InstallStatus::Failed(phase), InstallOutcome::Failed { phase, error })
            }
        };
        self.transition(InstallState::Done(status));
        outcome
    }

    fn transition(&mut self, next: InstallState) {
        debug!(
            "{} {}: {} -> {next}",
            self.request.plan.name(),
            self.request.plan.version(),
            self.state
        );
        self.state = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(&next);
        }
    }

    /// Enter `phase` unless the caller has cancelled.
    fn advance(&mut self, phase: Phase) -> PhaseResult<()> {
        if self.request.cancel.is_cancelled() {
            return Err((phase, InstallError::Cancelled { phase }));
        }
        self.transition(phase.into());
        Ok(())
    }

    fn execute(&mut self) -> PhaseResult<Vec<PathBuf>> {
        self.advance(Phase::Fetching)?;
        let staging = StagingArea::create(self.request.staging_parent, self.request.plan.name())
            .map_err(|source| (Phase::Fetching, InstallError::Staging { source }))?;
        let result = self.pipeline(staging.path());
        staging.close();
        result
    }

    fn pipeline(&mut self, staging: &Path) -> PhaseResult<Vec<PathBuf>> {
        let plan = self.request.plan;
        let fetched = self
            .fetcher
            .fetch(plan.source_url().as_str(), &self.request.cancel)
            .map_err(|e| (Phase::Fetching, InstallError::from(e)))?;

        self.advance(Phase::Verifying)?;
        let payload =
            verify(fetched, plan.digest()).map_err(|e| (Phase::Verifying, InstallError::from(e)))?;

        self.advance(Phase::Extracting)?;
        let tree = self
            .extractor
            .extract(&payload, plan.archive_format(), staging)
            .map_err(|e| (Phase::Extracting, InstallError::from(e)))?;
        drop(payload);

        self.advance(Phase::Installing)?;
        placement::install(&tree, plan.targets(), self.request.destination_root)
            .map_err(|e| (Phase::Installing, InstallError::from(e)))
    }
}

/// Install `request` using the production HTTP fetcher and extractor.
pub fn run_install(request: InstallRequest<'_>, policy: FetchPolicy) -> InstallOutcome {
    let fetcher = RetryingFetcher::http(policy);
    run_install_with(request, &fetcher, &ArchiveExtractor)
}

/// Testable inner function with injected dependencies.
///
/// The production entry point [`run_install`] delegates here with real
/// implementations; tests inject mocks.
pub fn run_install_with(
    request: InstallRequest<'_>,
    fetcher: &dyn ArtefactFetcher,
    extractor: &dyn ArtefactExtractor,
) -> InstallOutcome {
    Orchestrator::new(request, fetcher, extractor).run()
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
