//! Artefact retrieval with retry, backoff, and cancellation.
//!
//! Fetching is split in two layers so the retry policy is testable without
//! network access:
//!
//! - [`Transport`] performs a single request and returns the body bytes.
//!   [`http::HttpTransport`] is the production `ureq` implementation.
//! - [`RetryingFetcher`] wraps a transport, retrying transient failures with
//!   exponential backoff up to the policy's attempt budget. It implements
//!   [`ArtefactFetcher`], the seam the install orchestrator depends on.
//!
//! Nothing here writes to disk; bodies are streamed into memory under a
//! size ceiling.

pub mod http;

use crate::cancel::CancelToken;
use log::debug;
use std::fmt;
use std::time::Duration;

/// Per-request timeout applied to each attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default total number of attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default artefact size ceiling (256 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 256 * 1024 * 1024;
/// Default bound on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
/// Delay before the first retry; doubled for each later one.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Upper bound for a single backoff delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Network policy for artefact downloads.
///
/// # Examples
///
/// ```
/// use formula_installer::fetch::FetchPolicy;
/// use std::time::Duration;
///
/// let policy = FetchPolicy::default();
/// assert_eq!(policy.attempts(), 3);
/// assert_eq!(policy.backoff_for(0), Duration::from_millis(500));
/// assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Timeout for each individual attempt.
    pub timeout: Duration,
    /// Total attempt budget, including the first request. Zero is treated
    /// as one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Upper bound on any single backoff delay.
    pub backoff_cap: Duration,
    /// Maximum accepted artefact size in bytes.
    pub max_bytes: u64,
    /// Maximum number of redirects followed per attempt.
    pub max_redirects: u32,
    /// Permit plaintext HTTP sources and HTTPS-to-HTTP redirects.
    pub allow_insecure: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            max_bytes: DEFAULT_MAX_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_insecure: false,
        }
    }
}

impl FetchPolicy {
    /// Return the effective number of attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Return the delay after failed attempt number `attempt` (zero-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.backoff_cap)
    }
}

/// The category of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// The request or body read timed out.
    Timeout,
    /// The connection failed, dropped, or exceeded the redirect bound.
    ConnectionFailed,
    /// The server answered with a non-success status.
    HttpStatus(u16),
    /// The artefact exceeds the configured size ceiling.
    TooLarge,
    /// The caller cancelled the fetch.
    Cancelled,
    /// A plaintext URL or HTTPS-to-HTTP redirect was refused.
    InsecureTransport,
}

impl FetchErrorKind {
    /// Return whether a failure of this kind is worth retrying.
    ///
    /// Timeouts, connection failures, and 5xx statuses are transient; 4xx
    /// statuses mean the resource is absent or forbidden.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailed => true,
            Self::HttpStatus(code) => (500..600).contains(&code),
            Self::TooLarge | Self::Cancelled | Self::InsecureTransport => false,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::ConnectionFailed => f.write_str("connection failed"),
            Self::HttpStatus(code) => write!(f, "HTTP status {code}"),
            Self::TooLarge => f.write_str("artefact too large"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::InsecureTransport => f.write_str("insecure transport"),
        }
    }
}

/// A failed fetch: its kind, the URL, and the underlying message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("download of {url} failed ({kind}): {reason}")]
pub struct FetchError {
    kind: FetchErrorKind,
    url: String,
    reason: String,
}

impl FetchError {
    /// Create a fetch error.
    pub fn new(kind: FetchErrorKind, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a cancellation error for `url`.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Cancelled, url, "cancelled by caller")
    }

    /// Return the failure category.
    #[must_use]
    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    /// Return the URL that failed.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Return the underlying failure message.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Return whether the failure is transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Bytes retrieved from a source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// The response body.
    pub bytes: Vec<u8>,
    /// The URL the bytes were requested from.
    pub source_url: String,
}

/// A single-attempt download.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Request `url` once and return the body.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] classifying the failure.
    fn get(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError>;
}

/// Retrieves artefact bytes for the install orchestrator.
///
/// Abstractions allow tests to stub network behaviour entirely.
#[cfg_attr(test, mockall::automock)]
pub trait ArtefactFetcher {
    /// Fetch `url`, applying the implementation's retry policy.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once retries are exhausted, or
    /// immediately for non-retryable failures and cancellation.
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<FetchResult, FetchError>;
}

/// Retries a [`Transport`] with exponential backoff.
#[derive(Debug)]
pub struct RetryingFetcher<T> {
    transport: T,
    policy: FetchPolicy,
}

impl<T: Transport> RetryingFetcher<T> {
    /// Wrap `transport` with `policy`.
    pub fn new(transport: T, policy: FetchPolicy) -> Self {
        Self { transport, policy }
    }

    /// Return the active policy.
    #[must_use]
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }
}

impl RetryingFetcher<http::HttpTransport> {
    /// Build the production fetcher for `policy`.
    #[must_use]
    pub fn http(policy: FetchPolicy) -> Self {
        let transport = http::HttpTransport::new(&policy);
        Self::new(transport, policy)
    }
}

impl<T: Transport> ArtefactFetcher for RetryingFetcher<T> {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<FetchResult, FetchError> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::cancelled(url));
            }
            attempt += 1;
            match self.transport.get(url, cancel) {
                Ok(bytes) => {
                    debug!("fetched {} bytes from {url} on attempt {attempt}", bytes.len());
                    return Ok(FetchResult {
                        bytes,
                        source_url: url.to_owned(),
                    });
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.policy.backoff_for(attempt - 1);
                    debug!("attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}");
                    if !cancel.sleep(delay) {
                        return Err(FetchError::cancelled(url));
                    }
                }
                Err(err) => {
                    debug!("giving up on {url} after attempt {attempt}/{attempts}: {err}");
                    return Err(err);
                }
            }
        }
    }
}
