//! Content fingerprints for change detection.
//!
//! A fingerprint is a blake3 digest of a document's text bytes. Two documents
//! with identical content always produce the same fingerprint, independent of
//! process, time, or field ordering; any content change flips it with
//! overwhelming probability. Fingerprints are the cheap side of the
//! re-embedding decision: comparing 32 bytes instead of calling the
//! embedding API.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::corpus::Document;

/// A 32-byte blake3 content digest, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest the given text content.
    pub fn compute(content: &str) -> Self {
        Self(*blake3::hash(content.as_bytes()).as_bytes())
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a fingerprint from its hex encoding.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(digest))
    }
}

/// Compute the fingerprint of a document's content.
pub fn fingerprint_of(document: &Document) -> Fingerprint {
    Fingerprint::compute(&document.text)
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Full hex is noise in logs; the first 8 bytes identify a digest.
        write!(f, "Fingerprint({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
