//! Block digest algorithms for container records and fixity checks.
//!
//! Every record written into a container carries a block digest computed
//! over its payload, and the distributed client computes a validation
//! checksum before broadcasting an upload. The algorithm is configurable
//! per deployment; SHA-1 is the default because it is what the surrounding
//! archival tooling expects in `WARC-Block-Digest` headers.
//!
//! The wire form is `algorithm:hex`, e.g. `sha1:2ef7bde6...`.

use crate::error::{PreservationError, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Digest algorithm used for block digests and fixity checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1 (default for WARC block digests).
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Compute the lowercase hex digest of `data`.
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
            Self::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }

    /// Compute the `algorithm:hex` label for `data`, the form stored in
    /// `WARC-Block-Digest` headers and compared during fixity checks.
    pub fn labelled(&self, data: &[u8]) -> String {
        format!("{}:{}", self, self.digest(data))
    }

    /// Compute the lowercase hex digest of a file's contents.
    pub fn digest_file(&self, path: &Path) -> Result<String> {
        let data = std::fs::read(path).map_err(|e| PreservationError::write(path, e))?;
        Ok(self.digest(&data))
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

impl FromStr for DigestAlgorithm {
    type Err = PreservationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            other => Err(PreservationError::Configuration(format!(
                "unsupported digest algorithm '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_vector() {
        // sha1("abc")
        assert_eq!(
            DigestAlgorithm::Sha1.digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            DigestAlgorithm::Sha256.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_labelled_form() {
        let label = DigestAlgorithm::Sha1.labelled(b"abc");
        assert_eq!(label, "sha1:a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_default_is_sha1() {
        assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Sha1);
    }

    #[test]
    fn test_from_str_accepts_hyphenated() {
        assert_eq!("sha-1".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha1);
        assert_eq!("SHA256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("sha-512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "md5".parse::<DigestAlgorithm>().unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_display_roundtrip() {
        for alg in [DigestAlgorithm::Sha1, DigestAlgorithm::Sha256, DigestAlgorithm::Sha512] {
            assert_eq!(alg.to_string().parse::<DigestAlgorithm>().unwrap(), alg);
        }
    }

    #[test]
    fn test_digest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            DigestAlgorithm::Sha1.digest_file(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_digest_file_missing() {
        let err = DigestAlgorithm::Sha1
            .digest_file(Path::new("/nonexistent/file"))
            .unwrap_err();
        assert_eq!(err.kind(), "write");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&DigestAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
        let parsed: DigestAlgorithm = serde_json::from_str("\"sha1\"").unwrap();
        assert_eq!(parsed, DigestAlgorithm::Sha1);
    }
}
