//! Streaming digests for downloaded content.

use crate::core::PatchError;
use digest::DynDigest;
use std::fmt;
use std::str::FromStr;

/// Digest algorithms a file group may request with its `verify` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// MD5 (legacy servers; S3-style ETags)
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
}

impl DigestAlgorithm {
    /// Fresh hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }

    /// Length of the hex encoding of a digest.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }

    /// Hex digest of an in-memory buffer.
    #[must_use]
    pub fn hex_digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        })
    }
}

impl FromStr for DigestAlgorithm {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            other => Err(PatchError::ManifestParse {
                reason: format!("unknown verify algorithm '{other}'"),
            }),
        }
    }
}

/// Normalise an ETag for comparison with a hex digest.
///
/// Strips a weak-validator prefix and surrounding quotes. Returns `None` when the result is
/// not a plain hex string of the algorithm's digest length (multipart or opaque ETags).
#[must_use]
pub fn etag_as_digest(etag: &str, algorithm: DigestAlgorithm) -> Option<String> {
    let value = etag.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    let value = value.trim_matches('"').to_ascii_lowercase();
    let is_hex = value.chars().all(|c| c.is_ascii_hexdigit());
    (is_hex && value.len() == algorithm.hex_len()).then_some(value)
}
