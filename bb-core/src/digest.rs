//! Content digests, scoped to an instance name.
//!
//! A digest identifies a blob by `(hash, size_bytes)`. The instance name
//! partitions the storage namespace: equal hashes under different instance
//! names are different keys.

use std::fmt;

use bb_proto::remote_execution as pb;
use sha2::{Digest as _, Sha256};

use crate::errors::{BbError, BbResult};

/// Length of a lowercase hexadecimal SHA-256 hash.
pub const SHA256_HEX_LEN: usize = 64;

/// Validated digest of a blob within an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    instance: String,
    hash: String,
    size_bytes: i64,
}

impl Digest {
    /// Create a digest, validating the hash format and size.
    pub fn new(
        instance: impl Into<String>,
        hash: impl Into<String>,
        size_bytes: i64,
    ) -> BbResult<Self> {
        let hash = hash.into();
        if hash.len() != SHA256_HEX_LEN {
            return Err(BbError::invalid_argument(format!(
                "Unknown digest hash length: {} characters",
                hash.len()
            )));
        }
        if let Some(c) = hash.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(BbError::invalid_argument(format!(
                "Non-hexadecimal character in digest hash: {:?}",
                c
            )));
        }
        if size_bytes < 0 {
            return Err(BbError::invalid_argument(format!(
                "Invalid digest size: {} bytes",
                size_bytes
            )));
        }
        Ok(Self {
            instance: instance.into(),
            hash,
            size_bytes,
        })
    }

    /// Validate a digest received on the wire.
    pub fn from_proto(instance: &str, digest: &pb::Digest) -> BbResult<Self> {
        Self::new(instance, digest.hash.clone(), digest.size_bytes)
    }

    /// Like [`Digest::from_proto`], for optional message fields.
    pub fn from_optional_proto(instance: &str, digest: Option<&pb::Digest>) -> BbResult<Self> {
        let digest = digest.ok_or_else(|| BbError::invalid_argument("No digest provided"))?;
        Self::from_proto(instance, digest)
    }

    /// Compute the digest of an in-memory buffer.
    pub fn of_bytes(instance: impl Into<String>, data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        let (hash, size_bytes) = hasher.finish();
        Self {
            instance: instance.into(),
            hash,
            size_bytes,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }

    /// Same hash and size, different instance.
    pub fn with_instance(&self, instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            hash: self.hash.clone(),
            size_bytes: self.size_bytes,
        }
    }

    pub fn to_proto(&self) -> pb::Digest {
        pb::Digest {
            hash: self.hash.clone(),
            size_bytes: self.size_bytes,
        }
    }

    /// Check that `data` is exactly the content this digest refers to.
    pub fn verify(&self, data: &[u8]) -> BbResult<()> {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        hasher.verify(self)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}-{}", self.hash, self.size_bytes)
        } else {
            write!(f, "{}/{}-{}", self.instance, self.hash, self.size_bytes)
        }
    }
}

/// Incremental SHA-256 over a streamed blob, tracking its length.
#[derive(Clone, Default)]
pub struct DigestHasher {
    sha: Sha256,
    size_bytes: i64,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha.update(data);
        self.size_bytes += data.len() as i64;
    }

    /// Bytes hashed so far.
    pub fn size_bytes(&self) -> i64 {
        self.size_bytes
    }

    /// Lowercase hex hash and total length.
    pub fn finish(self) -> (String, i64) {
        (hex::encode(self.sha.finalize()), self.size_bytes)
    }

    /// Compare the hashed content against an expected digest.
    pub fn verify(self, expected: &Digest) -> BbResult<()> {
        let (hash, size_bytes) = self.finish();
        if size_bytes != expected.size_bytes() {
            return Err(BbError::invalid_argument(format!(
                "Blob is {} bytes in size, while {} bytes were expected",
                size_bytes,
                expected.size_bytes()
            )));
        }
        if hash != expected.hash() {
            return Err(BbError::invalid_argument(format!(
                "Blob has checksum {}, while {} was expected",
                hash,
                expected.hash()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_of_bytes_matches_known_sha256() {
        let digest = Digest::of_bytes("", b"");
        assert_eq!(digest.hash(), EMPTY_SHA256);
        assert_eq!(digest.size_bytes(), 0);
    }

    #[test]
    fn test_new_rejects_bad_hashes() {
        let short = Digest::new("main", "abc", 3).unwrap_err();
        assert_eq!(short.kind, ErrorKind::InvalidArgument);

        let upper = EMPTY_SHA256.to_uppercase();
        let err = Digest::new("main", upper, 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let err = Digest::new("main", EMPTY_SHA256, -1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_instance_partitions_identity() {
        let a = Digest::of_bytes("linux", b"hello");
        let b = a.with_instance("macos");
        assert_ne!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.size_bytes(), b.size_bytes());
    }

    #[test]
    fn test_from_optional_proto_requires_digest() {
        let err = Digest::from_optional_proto("main", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let proto = Digest::of_bytes("", b"data").to_proto();
        let digest = Digest::from_optional_proto("main", Some(&proto)).unwrap();
        assert_eq!(digest.instance(), "main");
        assert_eq!(digest.size_bytes(), 4);
    }

    #[test]
    fn test_verify_detects_mismatches() {
        let digest = Digest::of_bytes("", b"Hello, World!");
        assert!(digest.verify(b"Hello, World!").is_ok());
        assert!(digest.verify(b"Hello, World?").is_err());
        assert!(digest.verify(b"Hello").is_err());
    }

    #[test]
    fn test_display() {
        let digest = Digest::of_bytes("", b"");
        assert_eq!(digest.to_string(), format!("{}-0", EMPTY_SHA256));
        assert_eq!(
            digest.with_instance("main").to_string(),
            format!("main/{}-0", EMPTY_SHA256)
        );
    }
}
