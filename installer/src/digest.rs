//! Digest algorithm selection and expected-digest parsing.
//!
//! Descriptors record the archive digest as a lowercase hex string. The
//! algorithm is either named explicitly or inferred from the digest length,
//! so a 64-character value is SHA-256 and a 128-character value is SHA-512.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt::{self, Write as _};

/// Cryptographic digest algorithms accepted in descriptors.
///
/// # Examples
///
/// ```
/// use formula_installer::digest::DigestAlgorithm;
///
/// assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Sha256);
/// assert_eq!(DigestAlgorithm::from_hex_len(128), Some(DigestAlgorithm::Sha512));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, 32-byte output.
    #[default]
    Sha256,
    /// SHA-512, 64-byte output.
    Sha512,
}

impl DigestAlgorithm {
    /// Return the digest length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Infer the algorithm from the length of a hex-encoded digest.
    #[must_use]
    pub fn from_hex_len(len: usize) -> Option<Self> {
        [Self::Sha256, Self::Sha512]
            .into_iter()
            .find(|algorithm| algorithm.output_len() * 2 == len)
    }

    /// Compute the digest of `bytes`.
    #[must_use]
    pub fn compute(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(bytes).to_vec(),
            Self::Sha512 => Sha512::digest(bytes).to_vec(),
        }
    }

    /// Return the lowercase algorithm name used in descriptors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors arising from an invalid expected digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestParseError {
    /// No digest was supplied.
    #[error("digest is empty")]
    Empty,

    /// The digest is still a release-template placeholder.
    #[error("digest \"{value}\" is an unresolved placeholder")]
    Placeholder {
        /// The placeholder text found in place of a digest.
        value: String,
    },

    /// The digest is not lowercase hexadecimal.
    #[error("invalid hex digest: {reason}")]
    InvalidHex {
        /// Description of the validation failure.
        reason: String,
    },

    /// The digest length does not match the declared algorithm.
    #[error("{algorithm} digest must be {expected} hex characters, got {actual}")]
    LengthMismatch {
        /// The declared algorithm.
        algorithm: DigestAlgorithm,
        /// Expected number of hex characters.
        expected: usize,
        /// Number of hex characters supplied.
        actual: usize,
    },

    /// No algorithm was declared and none matches the digest length.
    #[error("cannot infer digest algorithm from {len} hex characters")]
    UnknownLength {
        /// Number of hex characters supplied.
        len: usize,
    },
}

/// A validated expected digest: algorithm plus raw digest bytes.
///
/// # Examples
///
/// ```
/// use formula_installer::digest::{DigestAlgorithm, ExpectedDigest};
///
/// let hex = "ab".repeat(32);
/// let digest = ExpectedDigest::parse(&hex, None).expect("valid digest");
/// assert_eq!(digest.algorithm(), DigestAlgorithm::Sha256);
/// assert_eq!(digest.as_bytes().len(), 32);
/// assert_eq!(digest.to_hex(), hex);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl ExpectedDigest {
    /// Parse a hex digest, inferring the algorithm from its length when
    /// `algorithm` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestParseError`] when the value is empty, a placeholder,
    /// not lowercase hex, or the wrong length for the algorithm.
    pub fn parse(
        value: &str,
        algorithm: Option<DigestAlgorithm>,
    ) -> Result<Self, DigestParseError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DigestParseError::Empty);
        }
        if is_placeholder(trimmed) {
            return Err(DigestParseError::Placeholder {
                value: trimmed.to_owned(),
            });
        }
        let algorithm = match algorithm {
            Some(declared) => declared,
            None => DigestAlgorithm::from_hex_len(trimmed.len())
                .ok_or(DigestParseError::UnknownLength { len: trimmed.len() })?,
        };
        let expected = algorithm.output_len() * 2;
        if trimmed.len() != expected {
            return Err(DigestParseError::LengthMismatch {
                algorithm,
                expected,
                actual: trimmed.len(),
            });
        }
        let bytes = decode_hex(trimmed)?;
        Ok(Self { algorithm, bytes })
    }

    /// Return the digest algorithm.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Return the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Return the digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

impl fmt::Display for ExpectedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Encode bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut hex, byte| {
            // Writing to a String cannot fail.
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// Placeholders are upper-case template tokens such as `SHA_PLACEHOLDER`.
fn is_placeholder(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_uppercase())
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && value.chars().any(|c| !c.is_ascii_hexdigit())
}

fn decode_hex(value: &str) -> Result<Vec<u8>, DigestParseError> {
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(DigestParseError::InvalidHex {
            reason: format!("non-hex character '{bad}'"),
        });
    }
    if value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(DigestParseError::InvalidHex {
            reason: "digest must be lowercase".to_owned(),
        });
    }
    value
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| match pair {
            [high, low] => Ok(nibble(*high) << 4 | nibble(*low)),
            _ => Err(DigestParseError::InvalidHex {
                reason: "odd number of hex characters".to_owned(),
            }),
        })
        .collect()
}

const fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn valid_digest() -> String {
        "a".repeat(64)
    }

    #[test]
    fn accepts_valid_sixty_four_char_hex() {
        let digest = ExpectedDigest::parse(&valid_digest(), None).expect("valid");
        assert_eq!(digest.algorithm(), DigestAlgorithm::Sha256);
        assert_eq!(digest.as_bytes(), [0xaa; 32].as_slice());
    }

    #[test]
    fn infers_sha512_from_length() {
        let digest = ExpectedDigest::parse(&"0f".repeat(64), None).expect("valid");
        assert_eq!(digest.algorithm(), DigestAlgorithm::Sha512);
        assert_eq!(digest.as_bytes().len(), 64);
    }

    #[rstest]
    #[case::too_short("abcdef", DigestParseError::UnknownLength { len: 6 })]
    #[case::empty("   ", DigestParseError::Empty)]
    #[case::placeholder(
        "SHA_PLACEHOLDER",
        DigestParseError::Placeholder { value: "SHA_PLACEHOLDER".to_owned() }
    )]
    fn rejects_malformed_digests(#[case] value: &str, #[case] expected: DigestParseError) {
        assert_eq!(ExpectedDigest::parse(value, None), Err(expected));
    }

    #[test]
    fn rejects_length_mismatch_for_declared_algorithm() {
        let result = ExpectedDigest::parse(&valid_digest(), Some(DigestAlgorithm::Sha512));
        assert!(matches!(
            result,
            Err(DigestParseError::LengthMismatch {
                expected: 128,
                actual: 64,
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_hex_characters() {
        let mut bad = "a".repeat(63);
        bad.push('g');
        let result = ExpectedDigest::parse(&bad, None);
        assert!(matches!(result, Err(DigestParseError::InvalidHex { .. })));
    }

    #[test]
    fn rejects_uppercase_hex() {
        let result = ExpectedDigest::parse(&"A".repeat(64), None);
        assert!(matches!(result, Err(DigestParseError::InvalidHex { .. })));
    }

    #[test]
    fn compute_matches_known_sha256_vector() {
        let digest = DigestAlgorithm::Sha256.compute(b"abc");
        assert_eq!(
            to_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn display_includes_algorithm_prefix() {
        let digest = ExpectedDigest::parse(&valid_digest(), None).expect("valid");
        assert_eq!(format!("{digest}"), format!("sha256:{}", valid_digest()));
    }
}
