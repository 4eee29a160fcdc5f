/*!
 * Content hashing
 *
 * SHA-256 over raw bytes. No line-ending or encoding normalization is done:
 * two files hash equal only when they are byte-identical.
 */

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Read buffer for streamed hashing
const BUFFER_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid digest {0:?}: expected 64 lowercase hex characters")]
pub struct InvalidDigest(pub String);

/// A 256-bit content digest as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse a digest received from outside (e.g. the ledger)
    pub fn parse(s: &str) -> Result<Self, InvalidDigest> {
        let valid = s.len() == DIGEST_HEX_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidDigest(s.chars().take(DIGEST_HEX_LEN + 8).collect()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

/// Streaming hasher that calculates the digest incrementally
pub struct StreamingHasher {
    hasher: Sha256,
    len: u64,
}

impl StreamingHasher {
    /// Create a new streaming hasher
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            len: 0,
        }
    }

    /// Update the hash with new data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes hashed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finalize and return the digest
    pub fn finalize(self) -> Digest {
        Digest(hex::encode(self.hasher.finalize()))
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash an in-memory buffer
pub fn hash(bytes: &[u8]) -> Digest {
    let mut hasher = StreamingHasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Hash everything a reader yields, returning the digest and byte count
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(Digest, u64)> {
    let mut hasher = StreamingHasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    let len = hasher.len();
    Ok((hasher.finalize(), len))
}

/// Hash a file without loading it into memory
pub fn hash_stream(path: &Path) -> io::Result<Digest> {
    hash_stream_with_size(path).map(|(digest, _)| digest)
}

/// Hash a file and report how many bytes were read
pub fn hash_stream_with_size(path: &Path) -> io::Result<(Digest, u64)> {
    let file = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
    hash_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // SHA256 of "hello world"
    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_streaming_hasher() {
        let mut hasher = StreamingHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.len(), 11);
        assert_eq!(hasher.finalize().as_str(), HELLO_WORLD);
    }

    #[test]
    fn test_hash_known_values() {
        assert_eq!(hash(b"hello world").as_str(), HELLO_WORLD);
        assert_eq!(
            hash(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_stream_matches_hash() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"hello world").unwrap();
        temp.flush().unwrap();

        let (digest, size) = hash_stream_with_size(temp.path()).unwrap();
        assert_eq!(digest, hash(b"hello world"));
        assert_eq!(size, 11);
    }

    #[test]
    fn test_hash_stream_spans_buffers() {
        let data: Vec<u8> = (0..(BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();

        assert_eq!(hash_stream(temp.path()).unwrap(), hash(&data));
    }

    #[test]
    fn test_line_endings_are_not_normalized() {
        assert_ne!(hash(b"a\nb"), hash(b"a\r\nb"));
    }

    #[test]
    fn test_digest_parse() {
        assert!(Digest::parse(HELLO_WORLD).is_ok());
        assert!(Digest::parse(&HELLO_WORLD.to_uppercase()).is_err());
        assert!(Digest::parse("abc").is_err());
        assert!(Digest::parse(&format!("{}0", HELLO_WORLD)).is_err());
    }
}
