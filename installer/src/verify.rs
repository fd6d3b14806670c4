//! Integrity verification of fetched artefacts.
//!
//! [`verify`] is the only way to obtain a [`VerifiedPayload`], and the
//! extractor accepts nothing else, so bytes that failed or skipped
//! verification cannot reach the filesystem.

use crate::digest::{DigestAlgorithm, ExpectedDigest, to_hex};
use crate::fetch::FetchResult;
use log::debug;

/// The archive digest differs from the descriptor's expected digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{algorithm} mismatch for {source_url}: expected {expected}, got {actual}")]
pub struct DigestMismatch {
    /// Algorithm used for both digests.
    pub algorithm: DigestAlgorithm,
    /// Expected digest in lowercase hex.
    pub expected: String,
    /// Digest of the received bytes in lowercase hex.
    pub actual: String,
    /// URL the bytes were fetched from.
    pub source_url: String,
}

/// Artefact bytes whose digest matched the expected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayload {
    bytes: Vec<u8>,
    source_url: String,
}

impl VerifiedPayload {
    /// Return the verified bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Return the URL the bytes were fetched from.
    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

/// Check `fetched` against `expected`.
///
/// The comparison is exact and order-sensitive. On mismatch the fetched
/// bytes are dropped with the result.
///
/// # Errors
///
/// Returns [`DigestMismatch`] when the computed digest differs.
///
/// # Examples
///
/// ```
/// use formula_installer::digest::{ExpectedDigest, to_hex, DigestAlgorithm};
/// use formula_installer::fetch::FetchResult;
/// use formula_installer::verify::verify;
///
/// let bytes = b"abc".to_vec();
/// let hex = to_hex(&DigestAlgorithm::Sha256.compute(&bytes));
/// let expected = ExpectedDigest::parse(&hex, None).expect("valid digest");
/// let fetched = FetchResult { bytes, source_url: "https://example.test/a".into() };
///
/// let payload = verify(fetched, &expected).expect("digest matches");
/// assert_eq!(payload.bytes(), b"abc");
/// ```
pub fn verify(
    fetched: FetchResult,
    expected: &ExpectedDigest,
) -> Result<VerifiedPayload, DigestMismatch> {
    let algorithm = expected.algorithm();
    let actual = algorithm.compute(&fetched.bytes);
    if actual.as_slice() != expected.as_bytes() {
        return Err(DigestMismatch {
            algorithm,
            expected: expected.to_hex(),
            actual: to_hex(&actual),
            source_url: fetched.source_url,
        });
    }
    debug!("{algorithm} verified for {}", fetched.source_url);
    Ok(VerifiedPayload {
        bytes: fetched.bytes,
        source_url: fetched.source_url,
    })
}
