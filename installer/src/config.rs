//! Installer configuration assembled from defaults and CLI overrides.

use crate::cli::InstallArgs;
use crate::dirs::BaseDirs;
use crate::fetch::FetchPolicy;
use camino::Utf8PathBuf;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Directory beneath the home directory used as the default root.
const DEFAULT_ROOT_DIRNAME: &str = ".local";
/// Directory beneath the cache directory that holds staging areas.
const STAGING_DIRNAME: &str = "staging";
/// Longest per-request timeout accepted, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Errors raised while building an [`InstallerConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No `--root` was given and the home directory is unknown.
    #[error("could not determine home directory; pass --root explicitly")]
    MissingHomeDirectory,

    /// A platform directory is not valid UTF-8.
    #[error("{what} is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Which directory was being resolved.
        what: &'static str,
        /// The offending path, lossily converted.
        path: String,
    },

    /// A numeric option was zero where a positive value is required.
    #[error("--{option} must be greater than zero")]
    ZeroValue {
        /// The offending option name.
        option: &'static str,
    },

    /// A numeric option exceeded its ceiling.
    #[error("--{option} must be at most {max}")]
    TooLarge {
        /// The offending option name.
        option: &'static str,
        /// The largest accepted value.
        max: u64,
    },
}

/// Resolved settings for one installer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerConfig {
    /// Network policy for the download.
    pub fetch: FetchPolicy,
    /// Root beneath which destinations are installed.
    pub destination_root: Utf8PathBuf,
    /// Parent directory for staging areas; the system temporary directory
    /// when `None`.
    pub staging_parent: Option<Utf8PathBuf>,
    /// Wall-clock budget for the whole install.
    pub deadline: Option<Duration>,
}

impl InstallerConfig {
    /// Build a configuration from parsed install arguments.
    ///
    /// Unset options take the [`FetchPolicy`] defaults. The destination root
    /// defaults to `~/.local` and the staging parent to the installer's
    /// cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingHomeDirectory`] when no root is given
    /// and the home directory cannot be found, [`ConfigError::NonUtf8Path`]
    /// when a platform directory is not UTF-8, [`ConfigError::ZeroValue`]
    /// for a zero timeout, deadline, retry count, or size, and
    /// [`ConfigError::TooLarge`] for a timeout above [`MAX_TIMEOUT_SECS`].
    pub fn from_install_args(
        args: &InstallArgs,
        dirs: &dyn BaseDirs,
    ) -> Result<Self, ConfigError> {
        let fetch = fetch_policy(args)?;
        let destination_root = match &args.root {
            Some(root) => root.clone(),
            None => default_root(dirs)?,
        };
        let staging_parent = match &args.staging_dir {
            Some(dir) => Some(dir.clone()),
            None => default_staging_parent(dirs)?,
        };
        let deadline = args
            .deadline
            .map(|secs| positive(secs, "deadline").map(Duration::from_secs))
            .transpose()?;

        Ok(Self {
            fetch,
            destination_root,
            staging_parent,
            deadline,
        })
    }
}

fn fetch_policy(args: &InstallArgs) -> Result<FetchPolicy, ConfigError> {
    let mut policy = FetchPolicy::default();
    if let Some(secs) = args.timeout {
        let secs = at_most(positive(secs, "timeout")?, MAX_TIMEOUT_SECS, "timeout")?;
        policy.timeout = Duration::from_secs(secs);
    }
    if let Some(max_retries) = args.max_retries {
        policy.max_retries = positive(max_retries, "max-retries")?;
    }
    if let Some(max_size) = args.max_size {
        policy.max_bytes = positive(max_size, "max-size")?;
    }
    policy.allow_insecure = args.allow_insecure;
    Ok(policy)
}

fn positive<T: PartialEq + From<u8>>(value: T, option: &'static str) -> Result<T, ConfigError> {
    if value == T::from(0) {
        return Err(ConfigError::ZeroValue { option });
    }
    Ok(value)
}

fn at_most(value: u64, max: u64, option: &'static str) -> Result<u64, ConfigError> {
    if value > max {
        return Err(ConfigError::TooLarge { option, max });
    }
    Ok(value)
}

fn default_root(dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, ConfigError> {
    let home = dirs.home_dir().ok_or(ConfigError::MissingHomeDirectory)?;
    Ok(utf8(home, "home directory")?.join(DEFAULT_ROOT_DIRNAME))
}

fn default_staging_parent(dirs: &dyn BaseDirs) -> Result<Option<Utf8PathBuf>, ConfigError> {
    dirs.installer_cache_dir()
        .map(|cache| utf8(cache, "cache directory").map(|dir| dir.join(STAGING_DIRNAME)))
        .transpose()
}

fn utf8(path: PathBuf, what: &'static str) -> Result<Utf8PathBuf, ConfigError> {
    Utf8PathBuf::try_from(path).map_err(|err| ConfigError::NonUtf8Path {
        what,
        path: err.into_path_buf().to_string_lossy().into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirs::MockBaseDirs;
    use rstest::{fixture, rstest};

    #[fixture]
    fn dirs() -> MockBaseDirs {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/test")));
        dirs.expect_installer_cache_dir()
            .returning(|| Some(PathBuf::from("/home/test/.cache/formula-installer")));
        dirs
    }

    #[rstest]
    fn defaults_come_from_base_dirs(dirs: MockBaseDirs) {
        let config = InstallerConfig::from_install_args(&InstallArgs::new("tool.toml"), &dirs)
            .expect("config builds");

        assert_eq!(config.destination_root, Utf8PathBuf::from("/home/test/.local"));
        assert_eq!(
            config.staging_parent,
            Some(Utf8PathBuf::from(
                "/home/test/.cache/formula-installer/staging"
            ))
        );
        assert_eq!(config.fetch, FetchPolicy::default());
        assert!(config.deadline.is_none());
    }

    #[test]
    fn explicit_directories_skip_the_platform_lookup() {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir().never();
        dirs.expect_installer_cache_dir().never();
        let args = InstallArgs {
            root: Some(Utf8PathBuf::from("/opt/tools")),
            staging_dir: Some(Utf8PathBuf::from("/var/tmp/formula")),
            ..InstallArgs::new("tool.toml")
        };

        let config = InstallerConfig::from_install_args(&args, &dirs).expect("config builds");

        assert_eq!(config.destination_root, Utf8PathBuf::from("/opt/tools"));
        assert_eq!(config.staging_parent, Some(Utf8PathBuf::from("/var/tmp/formula")));
    }

    #[rstest]
    fn overrides_reach_the_fetch_policy(dirs: MockBaseDirs) {
        let args = InstallArgs {
            timeout: Some(7),
            max_retries: Some(5),
            max_size: Some(4096),
            deadline: Some(60),
            allow_insecure: true,
            ..InstallArgs::new("tool.toml")
        };

        let config = InstallerConfig::from_install_args(&args, &dirs).expect("config builds");

        assert_eq!(config.fetch.timeout, Duration::from_secs(7));
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.max_bytes, 4096);
        assert!(config.fetch.allow_insecure);
        assert_eq!(config.deadline, Some(Duration::from_secs(60)));
    }

    #[rstest]
    #[case::timeout(InstallArgs { timeout: Some(0), ..InstallArgs::new("t.toml") }, "timeout")]
    #[case::size(InstallArgs { max_size: Some(0), ..InstallArgs::new("t.toml") }, "max-size")]
    #[case::deadline(InstallArgs { deadline: Some(0), ..InstallArgs::new("t.toml") }, "deadline")]
    #[case::retries(InstallArgs { max_retries: Some(0), ..InstallArgs::new("t.toml") }, "max-retries")]
    fn zero_values_are_rejected(
        dirs: MockBaseDirs,
        #[case] args: InstallArgs,
        #[case] option: &'static str,
    ) {
        let err = InstallerConfig::from_install_args(&args, &dirs).expect_err("zero rejected");
        assert_eq!(err, ConfigError::ZeroValue { option });
    }

    #[rstest]
    #[case::just_over(MAX_TIMEOUT_SECS + 1)]
    #[case::largest(u64::MAX)]
    fn oversized_timeout_is_rejected(dirs: MockBaseDirs, #[case] secs: u64) {
        let args = InstallArgs {
            timeout: Some(secs),
            ..InstallArgs::new("tool.toml")
        };

        let err = InstallerConfig::from_install_args(&args, &dirs).expect_err("timeout capped");
        assert_eq!(
            err,
            ConfigError::TooLarge {
                option: "timeout",
                max: MAX_TIMEOUT_SECS,
            }
        );
    }

    #[rstest]
    fn timeout_at_the_ceiling_is_accepted(dirs: MockBaseDirs) {
        let args = InstallArgs {
            timeout: Some(MAX_TIMEOUT_SECS),
            ..InstallArgs::new("tool.toml")
        };

        let config = InstallerConfig::from_install_args(&args, &dirs).expect("config builds");
        assert_eq!(config.fetch.timeout, Duration::from_secs(MAX_TIMEOUT_SECS));
    }

    #[rstest]
    fn huge_deadline_is_kept(dirs: MockBaseDirs) {
        let args = InstallArgs {
            deadline: Some(u64::MAX),
            ..InstallArgs::new("tool.toml")
        };

        let config = InstallerConfig::from_install_args(&args, &dirs).expect("config builds");
        assert_eq!(config.deadline, Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn missing_home_requires_an_explicit_root() {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir().returning(|| None);
        dirs.expect_installer_cache_dir().returning(|| None);

        let err = InstallerConfig::from_install_args(&InstallArgs::new("tool.toml"), &dirs)
            .expect_err("home is required");
        assert_eq!(err, ConfigError::MissingHomeDirectory);
    }

    #[test]
    fn missing_cache_dir_falls_back_to_system_temp() {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/test")));
        dirs.expect_installer_cache_dir().returning(|| None);

        let config = InstallerConfig::from_install_args(&InstallArgs::new("tool.toml"), &dirs)
            .expect("config builds");
        assert!(config.staging_parent.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_home_is_rejected() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir().return_once(|| {
            Some(PathBuf::from(OsString::from_vec(vec![
                b'/', b'h', b'o', b'm', b'e', b'/', 0xff,
            ])))
        });
        dirs.expect_installer_cache_dir().returning(|| None);

        let err = InstallerConfig::from_install_args(&InstallArgs::new("tool.toml"), &dirs)
            .expect_err("non-UTF-8 home rejected");
        assert!(matches!(err, ConfigError::NonUtf8Path { what: "home directory", .. }));
    }
}
