//! Keyed BLAKE3 checksums.
//!
//! One [`ChecksumAccumulator`] follows each pipeline stage. The key is
//! shared by both ends of a delivery, so a digest proves the bytes were
//! produced by a holder of the key as well as that they are intact.

use std::fmt;
use std::io::{self, Read, Write};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Checksum errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    /// The accumulator was already finalized
    #[error("checksum already finalized")]
    AlreadyFinalized,

    /// Key material was malformed
    #[error("invalid checksum key: {0}")]
    InvalidKey(String),
}

/// 32-byte checksum key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ChecksumKey([u8; 32]);

impl ChecksumKey {
    /// Create from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumError::InvalidKey` for bad hex or wrong length.
    pub fn from_hex(hex_str: &str) -> Result<Self, ChecksumError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| ChecksumError::InvalidKey(e.to_string()))?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChecksumError::InvalidKey(format!("expected 32 bytes, got {len}")))?;
        Ok(Self(bytes))
    }

    /// Derive a key from a delivery context (the project identifier).
    #[must_use]
    pub fn derive(context: &str) -> Self {
        Self(ferry_crypto::kdf::derive_checksum_key(context))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ChecksumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChecksumKey(..)")
    }
}

/// Incremental keyed hash over one stage's byte stream.
pub struct ChecksumAccumulator {
    hasher: blake3::Hasher,
    consumed: u64,
    finalized: bool,
}

impl ChecksumAccumulator {
    /// Create an accumulator keyed with `key`.
    #[must_use]
    pub fn new(key: &ChecksumKey) -> Self {
        Self {
            hasher: blake3::Hasher::new_keyed(key.as_bytes()),
            consumed: 0,
            finalized: false,
        }
    }

    /// Fold bytes into the digest.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyFinalized` after [`ChecksumAccumulator::finalize`].
    pub fn update(&mut self, chunk: &[u8]) -> Result<(), ChecksumError> {
        if self.finalized {
            return Err(ChecksumError::AlreadyFinalized);
        }
        self.hasher.update(chunk);
        self.consumed += chunk.len() as u64;
        Ok(())
    }

    /// Produce the lower-case hex digest. Succeeds at most once.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyFinalized` on a second call.
    pub fn finalize(&mut self) -> Result<String, ChecksumError> {
        if self.finalized {
            return Err(ChecksumError::AlreadyFinalized);
        }
        self.finalized = true;
        Ok(self.hasher.finalize().to_hex().to_string())
    }

    /// Bytes folded in so far.
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Whether the digest has been produced.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// Compare two hex digests in constant time.
#[must_use]
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.len() == actual.len() && bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
}

/// Reader that feeds every byte it yields into an accumulator.
pub struct HashingReader<R> {
    inner: R,
    accumulator: ChecksumAccumulator,
}

impl<R: Read> HashingReader<R> {
    /// Wrap `inner`.
    pub fn new(inner: R, accumulator: ChecksumAccumulator) -> Self {
        Self { inner, accumulator }
    }

    /// Return the inner reader and the accumulator.
    pub fn into_parts(self) -> (R, ChecksumAccumulator) {
        (self.inner, self.accumulator)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.accumulator
            .update(&buf[..n])
            .map_err(io::Error::other)?;
        Ok(n)
    }
}

/// Writer that feeds every byte it accepts into an accumulator.
pub struct HashingWriter<W> {
    inner: W,
    accumulator: ChecksumAccumulator,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W, accumulator: ChecksumAccumulator) -> Self {
        Self { inner, accumulator }
    }

    /// Return the inner writer and the accumulator.
    pub fn into_parts(self) -> (W, ChecksumAccumulator) {
        (self.inner, self.accumulator)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.accumulator
            .update(&buf[..n])
            .map_err(io::Error::other)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ChecksumKey {
        ChecksumKey::new([0x24u8; 32])
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut acc = ChecksumAccumulator::new(&key());
        acc.update(b"hello ").unwrap();
        acc.update(b"world").unwrap();
        assert_eq!(acc.bytes_consumed(), 11);

        let expected = blake3::keyed_hash(&[0x24u8; 32], b"hello world").to_hex().to_string();
        assert_eq!(acc.finalize().unwrap(), expected);
    }

    #[test]
    fn test_finalize_once() {
        let mut acc = ChecksumAccumulator::new(&key());
        acc.update(b"data").unwrap();
        let digest = acc.finalize().unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert_eq!(acc.finalize(), Err(ChecksumError::AlreadyFinalized));
        assert_eq!(acc.update(b"more"), Err(ChecksumError::AlreadyFinalized));
        assert!(acc.is_finalized());
    }

    #[test]
    fn test_key_separates_digests() {
        let mut a = ChecksumAccumulator::new(&ChecksumKey::derive("project-a"));
        let mut b = ChecksumAccumulator::new(&ChecksumKey::derive("project-b"));
        a.update(b"same").unwrap();
        b.update(b"same").unwrap();
        assert_ne!(a.finalize().unwrap(), b.finalize().unwrap());
    }

    #[test]
    fn test_key_from_hex() {
        let hex_key = "11".repeat(32);
        assert_eq!(ChecksumKey::from_hex(&hex_key).unwrap().as_bytes(), &[0x11u8; 32]);
        assert!(ChecksumKey::from_hex("1122").is_err());
        assert!(ChecksumKey::from_hex("not hex").is_err());
    }

    #[test]
    fn test_hashing_reader_and_writer_agree() {
        let data = vec![0xC3u8; 200_000];

        let mut reader = HashingReader::new(data.as_slice(), ChecksumAccumulator::new(&key()));
        let mut sink = HashingWriter::new(Vec::new(), ChecksumAccumulator::new(&key()));
        io::copy(&mut reader, &mut sink).unwrap();

        let (_, mut read_acc) = reader.into_parts();
        let (written, mut write_acc) = sink.into_parts();
        assert_eq!(written, data);
        assert_eq!(read_acc.bytes_consumed(), data.len() as u64);
        assert_eq!(read_acc.finalize().unwrap(), write_acc.finalize().unwrap());
    }

    #[test]
    fn test_digests_match() {
        assert!(digests_match("abcd", "abcd"));
        assert!(!digests_match("abcd", "abce"));
        assert!(!digests_match("abcd", "abc"));
    }
}
