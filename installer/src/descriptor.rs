//! Formula descriptors and validated install plans.
//!
//! A [`Descriptor`] is the declarative record supplied by the package
//! manager: package name, a source URL template, the release version, the
//! expected archive digest, and the files to install. Descriptors are plain
//! data and may be malformed; [`Descriptor::plan`] validates one and
//! produces an [`InstallPlan`], the only type the install pipeline accepts.
//!
//! The URL template carries a placeholder token (by default
//! `VERSION_PLACEHOLDER`) that is substituted with the version before any
//! network access, for example
//! `https://github.com/owner/tool/releases/download/vVERSION_PLACEHOLDER-stable/tool-macos.tar.gz`.

use crate::digest::{DigestAlgorithm, DigestParseError, ExpectedDigest};
use crate::extract::ArchiveFormat;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// The default version placeholder token in source URL templates.
pub const DEFAULT_PLACEHOLDER: &str = "VERSION_PLACEHOLDER";

/// One file to install: a path inside the archive and where it goes.
///
/// Destination paths are resolved beneath the install root; an absolute
/// destination such as `/usr/local/bin/tool` is re-rooted, so with root `/`
/// it names the real path and with root `/tmp/x` it names
/// `/tmp/x/usr/local/bin/tool`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallTarget {
    /// Path of the file relative to the extracted archive root.
    pub source: Utf8PathBuf,
    /// Destination path, relative to (or re-rooted under) the install root.
    pub destination: Utf8PathBuf,
}

impl InstallTarget {
    /// Create a target from a source path and a destination path.
    pub fn new(source: impl Into<Utf8PathBuf>, destination: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Return the destination with any root or prefix component removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use formula_installer::descriptor::InstallTarget;
    ///
    /// let target = InstallTarget::new("tool", "/usr/local/bin/tool");
    /// assert_eq!(target.relative_destination().as_str(), "usr/local/bin/tool");
    /// ```
    #[must_use]
    pub fn relative_destination(&self) -> Utf8PathBuf {
        self.destination
            .components()
            .filter(|component| {
                !matches!(component, Utf8Component::RootDir | Utf8Component::Prefix(_))
            })
            .collect()
    }
}

/// Errors describing why a descriptor is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// A required field is empty.
    #[error("descriptor field `{field}` must not be empty")]
    EmptyField {
        /// Name of the empty field.
        field: &'static str,
    },

    /// The resolved source URL is not a well-formed absolute URL.
    #[error("source URL \"{url}\" is invalid: {reason}")]
    InvalidUrl {
        /// The resolved URL text.
        url: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// The resolved source URL uses a scheme other than HTTP(S).
    #[error("source URL \"{url}\" uses unsupported scheme \"{scheme}\"")]
    UnsupportedScheme {
        /// The resolved URL text.
        url: String,
        /// The rejected scheme.
        scheme: String,
    },

    /// The expected digest is malformed.
    #[error("invalid expected digest: {0}")]
    Digest(#[from] DigestParseError),

    /// The descriptor lists nothing to install.
    #[error("descriptor lists no install targets")]
    NoInstallTargets,

    /// An install target path is unusable.
    #[error("install target path \"{path}\" is invalid: {reason}")]
    InvalidTargetPath {
        /// The rejected path.
        path: Utf8PathBuf,
        /// Description of the violated constraint.
        reason: &'static str,
    },

    /// Two install targets resolve to the same destination.
    #[error("destination \"{path}\" is listed more than once")]
    DuplicateDestination {
        /// The repeated destination.
        path: Utf8PathBuf,
    },

    /// The descriptor file could not be parsed.
    #[error("failed to parse {format} descriptor: {reason}")]
    Parse {
        /// The input format (`TOML` or `JSON`).
        format: &'static str,
        /// Description of the parse error.
        reason: String,
    },

    /// The descriptor file could not be read.
    #[error("failed to read descriptor {path}: {reason}")]
    Read {
        /// Path of the descriptor file.
        path: Utf8PathBuf,
        /// Description of the I/O error.
        reason: String,
    },
}

/// Result type alias using [`DescriptorError`].
pub type Result<T> = std::result::Result<T, DescriptorError>;

/// A formula descriptor as supplied by the package manager.
///
/// # Examples
///
/// ```
/// use formula_installer::descriptor::Descriptor;
///
/// let descriptor = Descriptor::from_toml_str(concat!(
///     "name = \"tool\"\n",
///     "url = \"https://example.test/tool-VERSION_PLACEHOLDER.tar.gz\"\n",
///     "version = \"1.2.0\"\n",
///     "sha256 = \"", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "\"\n",
///     "[[install]]\n",
///     "source = \"tool\"\n",
///     "destination = \"bin/tool\"\n",
/// ))
/// .expect("descriptor parses");
/// let plan = descriptor.plan().expect("descriptor is valid");
/// assert_eq!(plan.source_url().as_str(), "https://example.test/tool-1.2.0.tar.gz");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
    /// Package name.
    pub name: String,
    /// One-line package description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Project homepage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Source URL template, possibly containing the placeholder token.
    pub url: String,
    /// Release version substituted into the URL template.
    pub version: String,
    /// Expected digest of the archive, lowercase hex.
    #[serde(alias = "sha256", alias = "sha512")]
    pub digest: String,
    /// Digest algorithm; inferred from the digest length when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Archive format; inferred from the resolved URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_format: Option<ArchiveFormat>,
    /// Placeholder token replaced by the version in `url`.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Ordered list of files to install.
    #[serde(default, rename = "install")]
    pub install_targets: Vec<InstallTarget>,
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_owned()
}

impl Descriptor {
    /// Create a descriptor with the default placeholder and no optional
    /// metadata.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
        digest: impl Into<String>,
        install_targets: Vec<InstallTarget>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            homepage: None,
            url: url.into(),
            version: version.into(),
            digest: digest.into(),
            digest_algorithm: None,
            archive_format: None,
            placeholder: default_placeholder(),
            install_targets,
        }
    }

    /// Parse a descriptor from TOML. The result is not yet validated.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Parse`] when the TOML is malformed.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| DescriptorError::Parse {
            format: "TOML",
            reason: e.to_string(),
        })
    }

    /// Parse a descriptor from JSON. The result is not yet validated.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Parse`] when the JSON is malformed.
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| DescriptorError::Parse {
            format: "JSON",
            reason: e.to_string(),
        })
    }

    /// Load a descriptor file, choosing JSON for `.json` files and TOML
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Read`] if the file cannot be read and
    /// [`DescriptorError::Parse`] if it cannot be parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| DescriptorError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if path.extension() == Some("json") {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    /// Return a copy of this descriptor with `version` replaced.
    #[must_use]
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..self.clone()
        }
    }

    /// Resolve the source URL for the descriptor's own version.
    ///
    /// # Errors
    ///
    /// See [`Descriptor::resolved_url_for`].
    pub fn resolved_url(&self) -> Result<Url> {
        self.resolved_url_for(&self.version)
    }

    /// Substitute `version` for the placeholder token and validate the
    /// result as an absolute HTTP(S) URL with a host.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::EmptyField`] for an empty template,
    /// version, or placeholder, [`DescriptorError::InvalidUrl`] when the
    /// result does not parse or lacks a host, and
    /// [`DescriptorError::UnsupportedScheme`] for non-HTTP(S) schemes.
    pub fn resolved_url_for(&self, version: &str) -> Result<Url> {
        require_non_empty("url", &self.url)?;
        require_non_empty("version", version)?;
        require_non_empty("placeholder", &self.placeholder)?;

        let resolved = self.url.trim().replace(&self.placeholder, version.trim());
        let url = Url::parse(&resolved).map_err(|e| DescriptorError::InvalidUrl {
            url: resolved.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DescriptorError::UnsupportedScheme {
                scheme: url.scheme().to_owned(),
                url: resolved,
            });
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(DescriptorError::InvalidUrl {
                url: resolved,
                reason: "missing host".to_owned(),
            });
        }
        Ok(url)
    }

    /// Validate the descriptor without building a plan.
    ///
    /// # Errors
    ///
    /// Returns the first [`DescriptorError`] found; see
    /// [`Descriptor::plan`].
    pub fn validate(&self) -> Result<()> {
        self.plan().map(|_| ())
    }

    /// Validate the descriptor and produce an [`InstallPlan`].
    ///
    /// Rejects an empty name, URL, version, or digest; a digest that is
    /// still a placeholder or does not match its algorithm; an empty target
    /// list; target paths that are empty, escape via `..`, or (on the
    /// source side) are absolute; duplicate destinations; and a resolved
    /// URL that is not well formed.
    ///
    /// # Errors
    ///
    /// Returns the first [`DescriptorError`] found.
    pub fn plan(&self) -> Result<InstallPlan> {
        require_non_empty("name", &self.name)?;
        let source_url = self.resolved_url()?;
        let digest = ExpectedDigest::parse(&self.digest, self.digest_algorithm)?;
        let targets = validate_targets(&self.install_targets)?;
        let archive_format = self
            .archive_format
            .clone()
            .unwrap_or_else(|| ArchiveFormat::infer_from_url(&source_url));

        Ok(InstallPlan {
            name: self.name.trim().to_owned(),
            version: self.version.trim().to_owned(),
            source_url,
            digest,
            archive_format,
            targets,
        })
    }
}

/// A validated, immutable description of one install.
///
/// Only [`Descriptor::plan`] constructs plans, so every plan has a
/// well-formed URL, a parsed digest, and at least one safe target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    name: String,
    version: String,
    source_url: Url,
    digest: ExpectedDigest,
    archive_format: ArchiveFormat,
    targets: Vec<InstallTarget>,
}

impl InstallPlan {
    /// Return the package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the release version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Return the resolved source URL.
    #[must_use]
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    /// Return the expected archive digest.
    #[must_use]
    pub fn digest(&self) -> &ExpectedDigest {
        &self.digest
    }

    /// Return the archive format.
    #[must_use]
    pub fn archive_format(&self) -> &ArchiveFormat {
        &self.archive_format
    }

    /// Return the ordered install targets.
    #[must_use]
    pub fn targets(&self) -> &[InstallTarget] {
        &self.targets
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DescriptorError::EmptyField { field });
    }
    Ok(())
}

fn validate_targets(targets: &[InstallTarget]) -> Result<Vec<InstallTarget>> {
    if targets.is_empty() {
        return Err(DescriptorError::NoInstallTargets);
    }
    let mut seen = HashSet::new();
    for target in targets {
        validate_target_path(&target.source, false)?;
        validate_target_path(&target.destination, true)?;
        let relative = target.relative_destination();
        if !seen.insert(relative) {
            return Err(DescriptorError::DuplicateDestination {
                path: target.destination.clone(),
            });
        }
    }
    Ok(targets.to_vec())
}

fn validate_target_path(path: &Utf8Path, allow_absolute: bool) -> Result<()> {
    let invalid = |reason| DescriptorError::InvalidTargetPath {
        path: path.to_path_buf(),
        reason,
    };
    if path.as_str().trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    if !allow_absolute && path.has_root() {
        return Err(invalid("archive paths must be relative"));
    }
    if path
        .components()
        .any(|component| matches!(component, Utf8Component::ParentDir))
    {
        return Err(invalid("path must not contain `..`"));
    }
    if path.file_name().is_none() {
        return Err(invalid("path must name a file"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
