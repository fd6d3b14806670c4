//! Output formatting for the installer CLI.
//!
//! Everything here renders user-facing text; nothing writes to disk. The
//! binary writes these lines to stderr so stdout stays free for scripting.

use crate::descriptor::InstallPlan;
use crate::error::InstallError;
use crate::orchestrator::{InstallState, Phase};
use camino::Utf8Path;
use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

/// Write `message` and a newline to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort logging; ignore write failures.
    }
}

/// Describe a state change for the progress display.
///
/// Returns `None` for states that need no line of their own.
///
/// # Example
///
/// ```
/// use formula_installer::descriptor::{Descriptor, InstallTarget};
/// use formula_installer::orchestrator::InstallState;
/// use formula_installer::output::progress_message;
///
/// let plan = Descriptor::new(
///     "tool",
///     "https://example.test/tool-VERSION_PLACEHOLDER.tar.gz",
///     "1.0.0",
///     "a".repeat(64),
///     vec![InstallTarget::new("tool", "bin/tool")],
/// )
/// .plan()
/// .expect("valid plan");
///
/// let line = progress_message(&plan, &InstallState::Fetching).expect("fetching is reported");
/// assert!(line.contains("https://example.test/tool-1.0.0.tar.gz"));
/// assert!(progress_message(&plan, &InstallState::Idle).is_none());
/// ```
#[must_use]
pub fn progress_message(plan: &InstallPlan, state: &InstallState) -> Option<String> {
    let line = match state {
        InstallState::Fetching => format!(
            "Fetching {} {} from {}...",
            plan.name(),
            plan.version(),
            plan.source_url()
        ),
        InstallState::Verifying => format!("Verifying {} digest...", plan.digest().algorithm()),
        InstallState::Extracting => format!("Extracting {} archive...", plan.archive_format()),
        InstallState::Installing => format!("Installing {} file(s)...", plan.targets().len()),
        InstallState::Idle | InstallState::Done(_) => return None,
    };
    Some(line)
}

/// Format a success message after installation.
#[must_use]
pub fn success_message(plan: &InstallPlan, installed: &[PathBuf]) -> String {
    let plural = if installed.len() == 1 { "file" } else { "files" };
    let mut lines = vec![format!(
        "Installed {} {} ({} {plural}):",
        plan.name(),
        plan.version(),
        installed.len()
    )];
    lines.extend(installed.iter().map(|path| format!("  {}", path.display())));
    lines.join("\n")
}

/// Format a failure message naming the phase and, where useful, a hint.
#[must_use]
pub fn failure_message(plan: &InstallPlan, phase: Phase, error: &InstallError) -> String {
    let mut message = format!(
        "Failed to install {} {} while {phase}: {error}",
        plan.name(),
        plan.version()
    );
    if error.is_retryable() {
        message.push_str("\nThis failure may be transient; try again later.");
    }
    message
}

/// What a descriptor resolves to, for `check` and `--dry-run` output.
///
/// # Example
///
/// ```
/// use formula_installer::descriptor::{Descriptor, InstallTarget};
/// use formula_installer::output::PlanSummary;
///
/// let plan = Descriptor::new(
///     "tool",
///     "https://example.test/tool-VERSION_PLACEHOLDER.tar.gz",
///     "1.0.0",
///     "a".repeat(64),
///     vec![InstallTarget::new("tool", "/usr/local/bin/tool")],
/// )
/// .plan()
/// .expect("valid plan");
///
/// let text = PlanSummary { plan: &plan, destination_root: None }.display_text();
/// assert!(text.contains("Archive format: tar.gz"));
/// assert!(text.contains("tool -> /usr/local/bin/tool"));
/// ```
#[derive(Debug)]
pub struct PlanSummary<'a> {
    /// The resolved plan.
    pub plan: &'a InstallPlan,
    /// Root destinations would be re-rooted under, when known.
    pub destination_root: Option<&'a Utf8Path>,
}

impl PlanSummary<'_> {
    /// Format the summary for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let plan = self.plan;
        let mut lines = vec![
            format!("Package: {} {}", plan.name(), plan.version()),
            format!("Source: {}", plan.source_url()),
            format!("Archive format: {}", plan.archive_format()),
            format!(
                "Digest: {} {}",
                plan.digest().algorithm(),
                plan.digest().to_hex()
            ),
        ];
        if let Some(root) = self.destination_root {
            lines.push(format!("Destination root: {root}"));
        }
        lines.push(String::new());
        lines.push("Install targets:".to_owned());
        for target in plan.targets() {
            let destination = match self.destination_root {
                Some(root) => root.join(target.relative_destination()),
                None => target.destination.clone(),
            };
            lines.push(format!("  - {} -> {destination}", target.source));
        }
        lines.join("\n")
    }
}
