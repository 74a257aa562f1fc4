//! Content identity: the deduplication key for submitted images.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a content digest in bytes.
const DIGEST_LEN: usize = 32;

/// Content-addressed identity of an image: the SHA-256 digest of its raw
/// bytes.
///
/// Two submissions with byte-identical content always resolve to the same
/// identity, regardless of filename or submission time. The lowercase hex
/// form doubles as the artifact file stem, so the artifact directory is
/// itself the authoritative set of known identities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentIdentity([u8; DIGEST_LEN]);

impl ContentIdentity {
    /// Compute the identity of a raw byte stream.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Lowercase hex form, used as the artifact file stem.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentIdentity({})", self.to_hex())
    }
}

/// Error parsing a string that is not a valid hex digest.
#[derive(Debug, Error)]
#[error("invalid content identity: {0:?}")]
pub struct ParseIdentityError(String);

impl FromStr for ContentIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| ParseIdentityError(s.to_string()))?;
        let digest: [u8; DIGEST_LEN] = raw
            .try_into()
            .map_err(|_| ParseIdentityError(s.to_string()))?;
        Ok(Self(digest))
    }
}

impl Serialize for ContentIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_bytes_same_identity() {
        let a = ContentIdentity::digest(b"holiday photo");
        let b = ContentIdentity::digest(b"holiday photo");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_bytes_different_identity() {
        let a = ContentIdentity::digest(b"photo one");
        let b = ContentIdentity::digest(b"photo two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let identity = ContentIdentity::digest(b"round trip");
        let parsed: ContentIdentity = identity.to_hex().parse().unwrap();
        assert_eq!(identity, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-hex".parse::<ContentIdentity>().is_err());
        // Valid hex but wrong length.
        assert!("abcd".parse::<ContentIdentity>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let identity = ContentIdentity::digest(b"serde");
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, format!("\"{}\"", identity.to_hex()));

        let back: ContentIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, back);
    }
}
