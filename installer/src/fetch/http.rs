//! HTTP transport using `ureq`.
//!
//! Each request enforces the policy's timeout, redirect bound, and
//! downgrade protection through the agent configuration, and the size
//! ceiling while streaming the body.

use super::{FetchError, FetchErrorKind, FetchPolicy, Transport};
use crate::cancel::CancelToken;
use log::trace;
use std::io::{ErrorKind, Read};

/// User agent sent with every request.
const USER_AGENT: &str = concat!("formula-installer/", env!("CARGO_PKG_VERSION"));

/// Read buffer size for streamed bodies.
const CHUNK_SIZE: usize = 8192;

/// HTTP-based transport using `ureq`.
///
/// # Examples
///
/// ```
/// use formula_installer::fetch::FetchPolicy;
/// use formula_installer::fetch::http::HttpTransport;
///
/// let transport = HttpTransport::new(&FetchPolicy::default());
/// // Use transport.get(url, &cancel) in production
/// # let _ = transport;
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    agent: ureq::Agent,
    max_bytes: u64,
    allow_insecure: bool,
}

impl HttpTransport {
    /// Build a transport whose agent follows `policy`.
    #[must_use]
    pub fn new(policy: &FetchPolicy) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(policy.timeout))
            .max_redirects(policy.max_redirects)
            .https_only(!policy.allow_insecure)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            max_bytes: policy.max_bytes,
            allow_insecure: policy.allow_insecure,
        }
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        if !self.allow_insecure && !url.starts_with("https://") {
            return Err(FetchError::new(
                FetchErrorKind::InsecureTransport,
                url,
                "plaintext sources are disabled",
            ));
        }
        trace!("GET {url}");
        let response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;

        if let Some(length) = content_length(&response) {
            if length > self.max_bytes {
                return Err(too_large(url, self.max_bytes));
            }
        }

        let mut body = response.into_body();
        read_limited(&mut body.as_reader(), url, self.max_bytes, cancel)
    }
}

fn content_length<B>(response: &ureq::http::Response<B>) -> Option<u64> {
    response
        .headers()
        .get(ureq::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Stream `reader` into memory, failing once `max_bytes` is exceeded or the
/// token is cancelled.
pub(crate) fn read_limited(
    reader: &mut dyn Read,
    url: &str,
    max_bytes: u64,
    cancel: &CancelToken,
) -> Result<Vec<u8>, FetchError> {
    let mut bytes = Vec::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled(url));
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io_error(url, &e)),
        };
        let total = u64::try_from(bytes.len() + read).unwrap_or(u64::MAX);
        if total > max_bytes {
            return Err(too_large(url, max_bytes));
        }
        bytes.extend_from_slice(&buffer[..read]);
    }
    Ok(bytes)
}

fn too_large(url: &str, max_bytes: u64) -> FetchError {
    FetchError::new(
        FetchErrorKind::TooLarge,
        url,
        format!("artefact exceeds the {max_bytes}-byte limit"),
    )
}

/// Map a `ureq` error to a [`FetchError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> FetchError {
    let kind = match err {
        ureq::Error::StatusCode(code) => FetchErrorKind::HttpStatus(*code),
        ureq::Error::Timeout(_) => FetchErrorKind::Timeout,
        ureq::Error::RequireHttpsOnly(_) => FetchErrorKind::InsecureTransport,
        ureq::Error::BodyExceedsLimit(_) => FetchErrorKind::TooLarge,
        ureq::Error::Io(io) if io.kind() == ErrorKind::TimedOut => FetchErrorKind::Timeout,
        _ => FetchErrorKind::ConnectionFailed,
    };
    FetchError::new(kind, url, err.to_string())
}

fn map_io_error(url: &str, err: &std::io::Error) -> FetchError {
    let kind = if err.kind() == ErrorKind::TimedOut {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::ConnectionFailed
    };
    FetchError::new(kind, url, err.to_string())
}
