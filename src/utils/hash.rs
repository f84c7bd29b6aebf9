//! Streaming digests over the compressed archive stream.
//!
//! The splitter keeps two of these alive at once: a whole-stream digest and a
//! per-chunk digest that is reset at every chunk boundary.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use sha2::{Digest, Sha256, Sha512};

/// Configured integrity algorithm. `sha256` is the required value; anything
/// else works as long as a constructor exists here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
    Sha512,
}

impl HashAlgo {
    /// Sidecar filename extension, e.g. `sha256` in `*.part0001.sha256`.
    pub fn extension(&self) -> &'static str {
        match self {
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }

    pub fn hasher(&self) -> HashStream {
        match self {
            HashAlgo::Sha256 => HashStream::Sha256(Sha256::new()),
            HashAlgo::Sha512 => HashStream::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for HashAlgo {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgo::Sha256),
            "sha512" => Ok(HashAlgo::Sha512),
            other => Err(anyhow!("unsupported integrity algorithm: {other}")),
        }
    }
}

/// An in-flight digest; finalizing consumes it.
pub enum HashStream {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HashStream {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            HashStream::Sha256(h) => h.update(bytes),
            HashStream::Sha512(h) => h.update(bytes),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            HashStream::Sha256(h) => format!("{:x}", h.finalize()),
            HashStream::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Hash a byte slice in one shot; used for small fixture comparisons.
pub fn digest_hex(algo: HashAlgo, bytes: &[u8]) -> String {
    let mut hasher = algo.hasher();
    hasher.update(bytes);
    hasher.finalize_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256 of "Hello, World!"
        let expected = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
        assert_eq!(digest_hex(HashAlgo::Sha256, b"Hello, World!"), expected);
    }

    #[test]
    fn empty_input_digest() {
        let expected = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(digest_hex(HashAlgo::Sha256, b""), expected);
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut hasher = HashAlgo::Sha256.hasher();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(
            hasher.finalize_hex(),
            digest_hex(HashAlgo::Sha256, b"Hello, World!")
        );
    }

    #[test]
    fn algorithm_parsing() {
        assert_eq!("sha256".parse::<HashAlgo>().unwrap(), HashAlgo::Sha256);
        assert_eq!("SHA512".parse::<HashAlgo>().unwrap(), HashAlgo::Sha512);
        assert!("md5".parse::<HashAlgo>().is_err());
    }

    #[test]
    fn extension_names() {
        assert_eq!(HashAlgo::Sha256.extension(), "sha256");
        assert_eq!(HashAlgo::Sha512.to_string(), "sha512");
    }
}
