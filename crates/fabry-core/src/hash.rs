//! Content hashing for immutable artifacts.
//!
//! Every cube and map carries the SHA-256 digest of its shape and of its
//! elements in little-endian byte order. The digest doubles as the result
//! cache key, so two runs over identical data share intermediate products.

use std::fmt;

use sha2::{Digest, Sha256};

/// Bytes buffered before they are pushed into the digest.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Digest identifying an artifact by content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Incremental builder for a [`ContentHash`].
pub struct ContentHasher {
    digest: Sha256,
    buffer: Vec<u8>,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            digest: Sha256::new(),
            buffer: Vec::with_capacity(HASH_CHUNK_BYTES),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= HASH_CHUNK_BYTES {
            self.digest.update(&self.buffer);
            self.buffer.clear();
        }
    }

    /// Length-prefixed string, so consecutive tags cannot collide.
    pub fn tag(&mut self, value: &str) -> &mut Self {
        self.push(&(value.len() as u64).to_le_bytes());
        self.push(value.as_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.push(&value.to_le_bytes());
        self
    }

    pub fn usize(&mut self, value: usize) -> &mut Self {
        self.u64(value as u64)
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.push(&value.to_le_bytes());
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.push(&[value as u8]);
        self
    }

    pub fn opt_f64(&mut self, value: Option<f64>) -> &mut Self {
        match value {
            Some(v) => self.bool(true).f64(v),
            None => self.bool(false),
        }
    }

    pub fn hash(&mut self, value: &ContentHash) -> &mut Self {
        self.push(value.as_bytes());
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.push(value);
        self
    }

    pub fn finish(mut self) -> ContentHash {
        if !self.buffer.is_empty() {
            self.digest.update(&self.buffer);
        }
        ContentHash(self.digest.finalize().into())
    }
}
