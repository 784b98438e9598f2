//! Size + digest checks for downloaded artifacts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DownloadFailure;
use crate::hashing::{hash_file, ContentHasher};

/// Expected size and content digest of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub bytes: u64,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Picks the algorithm from the hex length of the expected digest.
    pub fn for_digest(digest: &str) -> Option<Self> {
        let digest = digest.trim();
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match digest.len() {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub(crate) fn hasher(self) -> ContentHasher {
        match self {
            Self::Sha1 => ContentHasher::sha1(),
            Self::Sha256 => ContentHasher::sha256(),
        }
    }
}

impl Signature {
    pub fn algorithm(&self) -> Result<DigestAlgorithm, DownloadFailure> {
        DigestAlgorithm::for_digest(&self.digest)
            .ok_or_else(|| DownloadFailure::UnsupportedDigest(self.digest.clone()))
    }

    fn normalized_digest(&self) -> String {
        self.digest.trim().to_ascii_lowercase()
    }

    /// Compares an observed size/digest pair against this signature.
    /// Size is checked first since it is the cheaper signal.
    pub fn check(&self, actual_bytes: u64, actual_digest: &str) -> Result<(), DownloadFailure> {
        if actual_bytes != self.bytes {
            return Err(DownloadFailure::SizeMismatch {
                expected: self.bytes,
                actual: actual_bytes,
            });
        }
        let expected = self.normalized_digest();
        if !actual_digest.eq_ignore_ascii_case(&expected) {
            return Err(DownloadFailure::DigestMismatch {
                expected,
                actual: actual_digest.to_ascii_lowercase(),
            });
        }
        Ok(())
    }
}

/// Verifies a file already on disk against `signature`.
pub fn verify_file(path: &Path, signature: &Signature) -> Result<(), DownloadFailure> {
    let algorithm = signature.algorithm()?;
    let (size, digest) = hash_file(path, algorithm.hasher())
        .map_err(|e| DownloadFailure::Io(format!("hashing {} failed: {e}", path.display())))?;
    signature.check(size, &digest)
}
