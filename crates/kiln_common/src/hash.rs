//! Content digests used to decide whether a source file must be recompiled.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Length in bytes of a [`ContentDigest`].
pub const DIGEST_LEN: usize = 32;

/// A 256-bit digest of a source file's content.
///
/// Two files with the same `ContentDigest` are assumed to have identical
/// content. Digests are normally supplied by the build orchestrator; the
/// cache never reads source files itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    /// Wraps raw digest bytes produced elsewhere.
    pub const fn from_raw(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a digest from a slice, returning `None` unless it is exactly
    /// [`DIGEST_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; DIGEST_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Computes the SHA-256 digest of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = ContentDigest::of(b"class A {}");
        let b = ContentDigest::of(b"class A {}");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = ContentDigest::of(b"class A {}");
        let b = ContentDigest::of(b"class B {}");
        assert_ne!(a, b);
    }

    #[test]
    fn known_sha256() {
        let d = ContentDigest::of(b"abc");
        assert_eq!(
            d.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(ContentDigest::from_slice(&[0u8; 31]).is_none());
        assert!(ContentDigest::from_slice(&[0u8; 33]).is_none());
        let d = ContentDigest::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(d.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn hex_parse() {
        let d = ContentDigest::of(b"abc");
        assert_eq!(ContentDigest::from_hex(&d.to_string()), Some(d));
        assert_eq!(ContentDigest::from_hex("ba7816"), None);
        assert_eq!(ContentDigest::from_hex("not hex"), None);
    }

    #[test]
    fn debug_abbreviated() {
        let d = ContentDigest::from_raw([0xab; 32]);
        assert_eq!(format!("{d:?}"), "ContentDigest(abab..)");
    }

    #[test]
    fn serde_roundtrip() {
        let d = ContentDigest::of(b"serde test");
        let json = serde_json::to_string(&d).unwrap();
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
