//! Checksum algorithms
//!
//! Repositories publish reference checksums as small sidecar files next to
//! each resource (`widget-1.0.jar.sha1`). This module knows the algorithms,
//! their sidecar extensions and how to read a sidecar.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use sha2::Digest;

use crate::error::ConfigError;

/// Chunk size for hashing files from disk
const CHUNK_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Md5,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Sidecar file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Md5 => 32,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    pub fn hasher(&self) -> Hasher {
        match self {
            Self::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            Self::Md5 => Hasher::Md5(md5::Md5::new()),
            Self::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            Self::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }

    /// Hash a file already on disk.
    pub fn digest_file(&self, path: &Path) -> std::io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize_hex())
    }

    /// Extract the digest from sidecar content.
    ///
    /// Accepts a bare digest, `sha1sum`-style `digest  filename` lines and an
    /// optional `algo:` prefix. Returns `None` if what's left isn't a hex
    /// digest of the right length.
    pub fn parse_sidecar(&self, content: &str) -> Option<String> {
        let token = content.split_whitespace().next()?.to_lowercase();
        let token = match token.split_once(':') {
            Some((_, digest)) => digest.to_string(),
            None => token,
        };
        let valid = token.len() == self.hex_len() && token.chars().all(|c| c.is_ascii_hexdigit());
        valid.then_some(token)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(ConfigError::UnknownChecksum(s.to_string())),
        }
    }
}

/// Incremental hasher for one algorithm.
#[derive(Clone)]
pub enum Hasher {
    Sha1(sha1::Sha1),
    Md5(md5::Md5),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Feeds the same bytes to several hashers, so every configured checksum is
/// computed in one pass over the stream.
pub struct MultiHasher {
    hashers: Vec<(ChecksumAlgorithm, Hasher)>,
}

impl MultiHasher {
    pub fn new(algorithms: &[ChecksumAlgorithm]) -> Self {
        let mut hashers: Vec<(ChecksumAlgorithm, Hasher)> = Vec::with_capacity(algorithms.len());
        for algorithm in algorithms {
            if !hashers.iter().any(|(a, _)| a == algorithm) {
                hashers.push((*algorithm, algorithm.hasher()));
            }
        }
        Self { hashers }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(data);
        }
    }

    pub fn finish(self) -> Checksums {
        Checksums(
            self.hashers
                .into_iter()
                .map(|(algorithm, hasher)| (algorithm, hasher.finalize_hex()))
                .collect(),
        )
    }
}

/// Computed digests, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checksums(Vec<(ChecksumAlgorithm, String)>);

impl Checksums {
    pub fn get(&self, algorithm: ChecksumAlgorithm) -> Option<&str> {
        self.0
            .iter()
            .find(|(a, _)| *a == algorithm)
            .map(|(_, digest)| digest.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChecksumAlgorithm, &str)> {
        self.0.iter().map(|(a, d)| (*a, d.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_digest_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        assert_eq!(ChecksumAlgorithm::Sha1.digest_file(&file_path).unwrap(), HELLO_SHA1);
        assert_eq!(ChecksumAlgorithm::Md5.digest_file(&file_path).unwrap(), HELLO_MD5);
        assert_eq!(ChecksumAlgorithm::Sha256.digest_file(&file_path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_multi_hasher_single_pass() {
        let mut hasher = MultiHasher::new(&[
            ChecksumAlgorithm::Sha1,
            ChecksumAlgorithm::Md5,
            ChecksumAlgorithm::Sha1,
        ]);
        hasher.update(b"hello ");
        hasher.update(b"world");
        let sums = hasher.finish();

        assert_eq!(sums.iter().count(), 2);
        assert_eq!(sums.get(ChecksumAlgorithm::Sha1), Some(HELLO_SHA1));
        assert_eq!(sums.get(ChecksumAlgorithm::Md5), Some(HELLO_MD5));
        assert_eq!(sums.get(ChecksumAlgorithm::Sha256), None);
    }

    #[test]
    fn test_parse_sidecar_formats() {
        let sha1 = ChecksumAlgorithm::Sha1;
        assert_eq!(sha1.parse_sidecar(HELLO_SHA1).as_deref(), Some(HELLO_SHA1));
        assert_eq!(
            sha1.parse_sidecar(&format!("{}  widget-1.0.jar\n", HELLO_SHA1.to_uppercase()))
                .as_deref(),
            Some(HELLO_SHA1)
        );
        assert_eq!(
            sha1.parse_sidecar(&format!("sha1:{}", HELLO_SHA1)).as_deref(),
            Some(HELLO_SHA1)
        );
    }

    #[test]
    fn test_parse_sidecar_rejects_garbage() {
        let sha1 = ChecksumAlgorithm::Sha1;
        assert_eq!(sha1.parse_sidecar(""), None);
        assert_eq!(sha1.parse_sidecar("<html>404</html>"), None);
        assert_eq!(sha1.parse_sidecar(HELLO_MD5), None);
    }

    #[test]
    fn test_from_str_accepts_common_spellings() {
        assert_eq!("SHA-1".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha1);
        assert_eq!("sha1".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha1);
        assert_eq!("MD5".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Md5);
        assert_eq!("sha-512".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha512);
        assert!(matches!(
            "crc32".parse::<ChecksumAlgorithm>(),
            Err(ConfigError::UnknownChecksum(_))
        ));
    }
}
