//! Request/state fingerprints
//!
//! Provides [`Fingerprint`], a strongly-typed 32-byte SHA-256 digest over a
//! request text and the scene state it was issued against. Used as the
//! result-cache key.

use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Separator placed between the request text and the state snapshot
pub const FINGERPRINT_SEPARATOR: &str = "_";

/// A 32-byte fingerprint (SHA-256)
///
/// Identical `(request, state)` pairs always produce the same fingerprint;
/// any change to the state produces a different one, even for the same
/// request text. Leading and trailing whitespace of both inputs is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the fingerprint of a request issued against a state snapshot
    #[must_use]
    pub fn compute(request: &str, state: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.trim().as_bytes());
        hasher.update(FINGERPRINT_SEPARATOR.as_bytes());
        hasher.update(state.trim().as_bytes());
        Self(hasher.finalize().into())
    }

    /// Create fingerprint from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FingerprintError> {
        if bytes.len() != 32 {
            return Err(FingerprintError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when decoding fingerprints
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Invalid digest length
    #[error("invalid fingerprint length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::compute("draw a red circle", "class A(Scene): pass");
        let b = Fingerprint::compute("draw a red circle", "class A(Scene): pass");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_state() {
        let a = Fingerprint::compute("draw a red circle", "state one");
        let b = Fingerprint::compute("draw a red circle", "state two");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_ignores_surrounding_whitespace() {
        let a = Fingerprint::compute("  draw a red circle\n", "\nstate ");
        let b = Fingerprint::compute("draw a red circle", "state");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_matches_reference_digest() {
        // sha256("hello_world")
        let fp = Fingerprint::compute("hello", "world");
        assert_eq!(
            fp.to_string(),
            "35072c1ae546350e0bfa7ab11d49dc6f129e72ccd57ec7eb671225bbd197c8f1"
        );
    }

    #[test]
    fn fingerprint_display_and_parse() {
        let fp = Fingerprint::compute("req", "state");
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn fingerprint_from_slice_invalid_length() {
        let result = Fingerprint::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(FingerprintError::InvalidLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn fingerprint_short_is_prefix() {
        let fp = Fingerprint::compute("req", "state");
        assert_eq!(fp.short().len(), 16);
        assert!(fp.to_string().starts_with(&fp.short()));
    }

    #[test]
    fn fingerprint_serde_json_is_hex_string() {
        let fp = Fingerprint::compute("req", "state");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{fp}\""));
        let decoded: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, decoded);
    }
}
