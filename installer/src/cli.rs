//! CLI argument definitions for the formula installer.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Fetch, verify, and install packages described by formula descriptors.
#[derive(Parser, Debug)]
#[command(name = "formula-install")]
#[command(version, about)]
#[command(long_about = concat!(
    "Fetch, verify, and install packages described by formula descriptors.\n\n",
    "A descriptor names a release archive, its expected digest, and the files ",
    "to copy out of it. The installer downloads the archive over HTTPS, checks ",
    "the digest before unpacking anything, extracts into a private staging ",
    "directory, and then moves every file into place atomically.\n\n",
    "Absolute destinations in the descriptor are re-rooted under --root, so ",
    "`/usr/local/bin/tool` installs to `~/.local/usr/local/bin/tool` by default.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Install a package under ~/.local:\n",
    "    $ formula-install install ripgrep.toml\n\n",
    "  Install a different release into a custom root:\n",
    "    $ formula-install install ripgrep.toml --override-version 14.1.1 --root /opt/tools\n\n",
    "  Show what a descriptor resolves to without downloading:\n",
    "    $ formula-install check ripgrep.toml",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download, verify, and install a package.
    Install(InstallArgs),

    /// Validate a descriptor and print what it resolves to.
    Check(CheckArgs),
}

/// Arguments for the install command.
#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Path to the descriptor (`.toml` or `.json`).
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: Utf8PathBuf,

    /// Root beneath which destinations are installed [default: ~/.local].
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<Utf8PathBuf>,

    /// Install this version instead of the one in the descriptor.
    #[arg(long, value_name = "VERSION")]
    pub override_version: Option<String>,

    /// Parent directory for staging areas [default: platform cache dir].
    #[arg(long, value_name = "DIR")]
    pub staging_dir: Option<Utf8PathBuf>,

    /// Timeout in seconds for each download attempt, at most one day.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Abandon the whole install after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Total download attempts, including the first.
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Reject artefacts larger than this many bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Permit plaintext HTTP sources and HTTPS-to-HTTP redirects.
    #[arg(long)]
    pub allow_insecure: bool,

    /// Resolve and print the plan without downloading anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        alias = "verbosity",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Arguments for the check command.
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Path to the descriptor (`.toml` or `.json`).
    #[arg(value_name = "DESCRIPTOR")]
    pub descriptor: Utf8PathBuf,

    /// Resolve this version instead of the one in the descriptor.
    #[arg(long, value_name = "VERSION")]
    pub override_version: Option<String>,
}

impl InstallArgs {
    /// Create arguments for `descriptor` with every option unset.
    ///
    /// # Examples
    ///
    /// ```
    /// use formula_installer::cli::InstallArgs;
    ///
    /// let args = InstallArgs::new("tool.toml");
    /// assert!(args.root.is_none());
    /// assert!(!args.allow_insecure);
    /// ```
    #[must_use]
    pub fn new(descriptor: impl Into<Utf8PathBuf>) -> Self {
        Self {
            descriptor: descriptor.into(),
            root: None,
            override_version: None,
            staging_dir: None,
            timeout: None,
            deadline: None,
            max_retries: None,
            max_size: None,
            allow_insecure: false,
            dry_run: false,
            verbosity: 0,
            quiet: false,
        }
    }
}

impl Cli {
    /// Return the log verbosity requested on the command line.
    ///
    /// `check` always runs at the default level.
    #[must_use]
    pub fn verbosity(&self) -> u8 {
        match &self.command {
            Command::Install(args) => args.verbosity,
            Command::Check(_) => 0,
        }
    }

    /// Return whether progress output is suppressed.
    #[must_use]
    pub fn quiet(&self) -> bool {
        matches!(&self.command, Command::Install(args) if args.quiet)
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
