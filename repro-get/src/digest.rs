//! Validated SHA-256 digest strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::Error;

/// A validated SHA-256 digest: exactly 64 lowercase hexadecimal characters,
/// without an algorithm prefix.
///
/// The encoded form is the canonical key for blobs, metadata, and hash file
/// entries. Every API in this crate that takes a digest takes this type, so
/// validation happens exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parses a bare 64-character lowercase hex digest.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(Error::InvalidDigest(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }

    /// Parses a digest in the `sha256:<hex>` form.
    ///
    /// Any other algorithm prefix is an error.
    pub fn parse_prefixed(s: &str) -> Result<Self, Error> {
        match s.split_once(':') {
            Some(("sha256", hex)) => Self::parse(hex),
            _ => Err(Error::InvalidDigest(s.to_owned())),
        }
    }

    /// Computes the digest of a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Returns the 64-character hex encoding.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns the digest in the `sha256:<hex>` form used by OCI and the
    /// reverse-URL sidecar files.
    pub fn prefixed(&self) -> String {
        format!("sha256:{}", self.0)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sha256Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Sha256Digest> for String {
    fn from(d: Sha256Digest) -> Self {
        d.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn parse_valid() {
        let d = Sha256Digest::parse(HELLO).unwrap();
        assert_eq!(d.as_hex(), HELLO);
        assert_eq!(d.prefixed(), format!("sha256:{HELLO}"));
    }

    #[test]
    fn parse_rejects_bad_forms() {
        assert!(Sha256Digest::parse("").is_err());
        assert!(Sha256Digest::parse("deadbeef").is_err());
        // Uppercase hex is not canonical.
        assert!(Sha256Digest::parse(&HELLO.to_uppercase()).is_err());
        // Non-hex character.
        let mut s = HELLO.to_owned();
        s.replace_range(0..1, "g");
        assert!(Sha256Digest::parse(&s).is_err());
        // Prefixed form is not a bare digest.
        assert!(Sha256Digest::parse(&format!("sha256:{HELLO}")).is_err());
    }

    #[test]
    fn parse_prefixed_roundtrip() {
        let d = Sha256Digest::parse_prefixed(&format!("sha256:{HELLO}")).unwrap();
        assert_eq!(d.as_hex(), HELLO);
    }

    #[test]
    fn parse_prefixed_rejects_other_algorithms() {
        assert!(Sha256Digest::parse_prefixed(&format!("sha512:{HELLO}")).is_err());
        assert!(Sha256Digest::parse_prefixed(HELLO).is_err());
    }

    #[test]
    fn from_bytes() {
        assert_eq!(Sha256Digest::from_bytes(b"hello").as_hex(), HELLO);
    }
}
