//! Formula installer CLI entrypoint.
//!
//! This binary loads a formula descriptor, downloads and verifies the
//! artefact it names, and installs the listed files beneath a destination
//! root. Progress and results are written to stderr.

use camino::Utf8Path;
use clap::Parser;
use formula_installer::cancel::CancelToken;
use formula_installer::cli::{CheckArgs, Cli, Command, InstallArgs};
use formula_installer::config::{ConfigError, InstallerConfig};
use formula_installer::descriptor::{Descriptor, DescriptorError, InstallPlan};
use formula_installer::dirs::{BaseDirs, SystemBaseDirs};
use formula_installer::extract::ArchiveExtractor;
use formula_installer::fetch::RetryingFetcher;
use formula_installer::orchestrator::{InstallOutcome, InstallRequest, InstallState, Orchestrator};
use formula_installer::output::{
    PlanSummary, failure_message, progress_message, success_message, write_stderr_line,
};
use log::LevelFilter;
use std::io::Write;

/// Exit status for a failed install.
const EXIT_INSTALL_FAILED: i32 = 1;
/// Exit status for descriptor and configuration errors.
const EXIT_USAGE: i32 = 2;

/// Failures surfaced by the binary, each with its own exit status.
#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Install(String),
}

impl RunError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Descriptor(_) | Self::Config(_) => EXIT_USAGE,
            Self::Install(_) => EXIT_INSTALL_FAILED,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &SystemBaseDirs, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Install the global logger; `RUST_LOG` overrides the `-v` level.
fn init_logging(cli: &Cli) {
    env_logger::Builder::new()
        .filter_level(log_level(cli.verbosity(), cli.quiet()))
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn log_level(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn run(cli: &Cli, dirs: &dyn BaseDirs, stderr: &mut dyn Write) -> Result<(), RunError> {
    match &cli.command {
        Command::Install(args) => run_install(args, dirs, stderr),
        Command::Check(args) => run_check(args, stderr),
    }
}

/// Load and validate a descriptor, applying any version override.
fn load_plan(path: &Utf8Path, override_version: Option<&str>) -> Result<InstallPlan, RunError> {
    let descriptor = Descriptor::load(path)?;
    let descriptor = match override_version {
        Some(version) => descriptor.with_version(version),
        None => descriptor,
    };
    Ok(descriptor.plan()?)
}

fn run_check(args: &CheckArgs, stderr: &mut dyn Write) -> Result<(), RunError> {
    let plan = load_plan(&args.descriptor, args.override_version.as_deref())?;
    let summary = PlanSummary {
        plan: &plan,
        destination_root: None,
    };
    write_stderr_line(stderr, summary.display_text());
    Ok(())
}

fn run_install(
    args: &InstallArgs,
    dirs: &dyn BaseDirs,
    stderr: &mut dyn Write,
) -> Result<(), RunError> {
    let plan = load_plan(&args.descriptor, args.override_version.as_deref())?;
    let config = InstallerConfig::from_install_args(args, dirs)?;

    if args.dry_run {
        print_dry_run_info(&plan, &config, stderr);
        return Ok(());
    }

    let cancel = config
        .deadline
        .map_or_else(CancelToken::new, CancelToken::with_timeout);
    let request = InstallRequest {
        plan: &plan,
        destination_root: config.destination_root.as_std_path(),
        staging_parent: config.staging_parent.as_deref().map(Utf8Path::as_std_path),
        cancel,
    };
    let fetcher = RetryingFetcher::http(config.fetch.clone());
    let quiet = args.quiet;
    let outcome = Orchestrator::new(request, &fetcher, &ArchiveExtractor)
        .with_observer(|state: &InstallState| {
            if quiet {
                return;
            }
            if let Some(line) = progress_message(&plan, state) {
                write_stderr_line(stderr, line);
            }
        })
        .run();

    match outcome {
        InstallOutcome::Success { installed } => {
            if !quiet {
                write_stderr_line(stderr, "");
                write_stderr_line(stderr, success_message(&plan, &installed));
            }
            Ok(())
        }
        InstallOutcome::Failed { phase, error } => {
            Err(RunError::Install(failure_message(&plan, phase, &error)))
        }
    }
}

/// Prints dry run configuration information.
fn print_dry_run_info(plan: &InstallPlan, config: &InstallerConfig, stderr: &mut dyn Write) {
    write_stderr_line(stderr, "Dry run - no files will be modified");
    write_stderr_line(stderr, "");
    let summary = PlanSummary {
        plan,
        destination_root: Some(&config.destination_root),
    };
    write_stderr_line(stderr, summary.display_text());
    write_stderr_line(stderr, "");
    match &config.staging_parent {
        Some(dir) => write_stderr_line(stderr, format!("Staging directory: {dir}")),
        None => write_stderr_line(stderr, "Staging directory: system temporary directory"),
    }
    write_stderr_line(
        stderr,
        format!("Attempt timeout: {}s", config.fetch.timeout.as_secs()),
    );
    write_stderr_line(stderr, format!("Attempts: {}", config.fetch.attempts()));
    write_stderr_line(stderr, format!("Size limit: {} bytes", config.fetch.max_bytes));
    if let Some(deadline) = config.deadline {
        write_stderr_line(stderr, format!("Deadline: {}s", deadline.as_secs()));
    }
    if config.fetch.allow_insecure {
        write_stderr_line(stderr, "Plaintext HTTP: allowed");
    }
}

fn exit_code_for_run_result(result: Result<(), RunError>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, &err);
            err.exit_code()
        }
    }
}
