//! Segmented streaming encryption.
//!
//! A file payload is split into [`SEGMENT_SIZE`] plaintext segments, each
//! sealed independently with XChaCha20-Poly1305:
//!
//! ```text
//! sealed segment = nonce (24) || ciphertext (<= 64 KiB) || tag (16)
//! nonce          = 16 fresh random bytes || segment index (u64 LE)
//! aad            = header digest (32) || segment index (u64 LE) || last flag (u8)
//! ```
//!
//! Binding the index and the last flag into the AAD means a reordered,
//! dropped or truncated segment fails authentication. Every stream ends with
//! exactly one final-flagged segment, which may be empty.

use super::cipher::{CachedAeadCipher, NONCE_SIZE, Nonce, TAG_SIZE};
use crate::CryptoError;
use crate::exchange::{EncryptionHeader, RecipientKey, SessionKey};
use crate::random::random_16;
use std::io::{self, Read, Write};

/// Plaintext bytes per segment (64 KiB).
pub const SEGMENT_SIZE: usize = 64 * 1024;

/// Bytes a sealed segment adds on top of its plaintext.
pub const SEALED_SEGMENT_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

const FULL_SEALED_SEGMENT: usize = SEGMENT_SIZE + SEALED_SEGMENT_OVERHEAD;

/// Sealed size of a stream carrying `plaintext_len` bytes, excluding the header.
#[must_use]
pub fn sealed_len(plaintext_len: u64) -> u64 {
    let segment = SEGMENT_SIZE as u64;
    let segments = plaintext_len.div_ceil(segment).max(1);
    plaintext_len + segments * SEALED_SEGMENT_OVERHEAD as u64
}

/// Per-session segment cipher.
///
/// Keeps independent encrypt and decrypt counters; a session only ever uses
/// one direction in practice.
pub struct SegmentCipher {
    cipher: CachedAeadCipher,
    header_digest: [u8; 32],
    next_encrypt: u64,
    next_decrypt: u64,
    encrypt_finished: bool,
    decrypt_finished: bool,
}

impl SegmentCipher {
    /// Create a cipher for one session key, bound to the header digest.
    #[must_use]
    pub fn new(key: &SessionKey, header_digest: &[u8; 32]) -> Self {
        Self {
            cipher: CachedAeadCipher::from_bytes(key.as_bytes()),
            header_digest: *header_digest,
            next_encrypt: 0,
            next_decrypt: 0,
            encrypt_finished: false,
            decrypt_finished: false,
        }
    }

    fn aad(&self, index: u64, last: bool) -> [u8; 41] {
        let mut aad = [0u8; 41];
        aad[..32].copy_from_slice(&self.header_digest);
        aad[32..40].copy_from_slice(&index.to_le_bytes());
        aad[40] = u8::from(last);
        aad
    }

    /// Seal the next segment.
    ///
    /// Returns the fresh nonce and `ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the final segment was already sealed or the
    ///   plaintext exceeds [`SEGMENT_SIZE`]
    /// - `NonceExhausted` if the segment counter would wrap
    /// - `RandomFailed` / `EncryptionFailed` from the underlying primitives
    pub fn encrypt_segment(
        &mut self,
        plaintext: &[u8],
        last: bool,
    ) -> Result<(Nonce, Vec<u8>), CryptoError> {
        if self.encrypt_finished {
            return Err(CryptoError::InvalidState("final segment already sealed"));
        }
        if plaintext.len() > SEGMENT_SIZE {
            return Err(CryptoError::InvalidState("segment exceeds SEGMENT_SIZE"));
        }
        let index = self.next_encrypt;
        if index == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }

        let nonce = Nonce::from_counter(index, &random_16()?);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext, &self.aad(index, last))?;

        self.next_encrypt += 1;
        self.encrypt_finished = last;
        Ok((nonce, ciphertext))
    }

    /// Open the next segment.
    ///
    /// No plaintext is returned unless the tag verifies.
    ///
    /// # Errors
    ///
    /// - `SegmentAuthentication` if the tag, index or last flag do not match
    /// - `InvalidState` if the final segment was already opened
    pub fn decrypt_segment(
        &mut self,
        nonce: &Nonce,
        ciphertext: &[u8],
        last: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        if self.decrypt_finished {
            return Err(CryptoError::InvalidState("final segment already opened"));
        }
        let index = self.next_decrypt;
        if nonce.counter() != index {
            return Err(CryptoError::SegmentAuthentication { index });
        }

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext, &self.aad(index, last))
            .map_err(|_| CryptoError::SegmentAuthentication { index })?;

        self.next_decrypt += 1;
        self.decrypt_finished = last;
        Ok(plaintext)
    }

    /// Whether `ciphertext` would open as a non-final segment at the current index.
    ///
    /// Used to tell a truncated stream apart from a corrupted one.
    fn opens_as_intermediate(&self, nonce: &Nonce, ciphertext: &[u8]) -> bool {
        let index = self.next_decrypt;
        nonce.counter() == index
            && self
                .cipher
                .decrypt(nonce, ciphertext, &self.aad(index, false))
                .is_ok()
    }

    /// Number of segments sealed so far.
    #[must_use]
    pub fn segments_sealed(&self) -> u64 {
        self.next_encrypt
    }

    /// Number of segments opened so far.
    #[must_use]
    pub fn segments_opened(&self) -> u64 {
        self.next_decrypt
    }
}

/// Streaming writer producing `header || segment*`.
///
/// Plaintext is buffered until a full segment is available; a full buffer is
/// only sealed once more data arrives, so [`SegmentWriter::finish`] can always
/// flag the last segment.
pub struct SegmentWriter<W: Write> {
    inner: W,
    cipher: SegmentCipher,
    buffer: Vec<u8>,
    bytes_written: u64,
}

impl<W: Write> SegmentWriter<W> {
    /// Write the header to `inner` and prepare to seal segments under `key`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Io` if the header cannot be written.
    pub fn new(mut inner: W, header: &EncryptionHeader, key: &SessionKey) -> Result<Self, CryptoError> {
        header.write_to(&mut inner)?;
        Ok(Self {
            inner,
            cipher: SegmentCipher::new(key, &header.digest()),
            buffer: Vec::with_capacity(SEGMENT_SIZE * 2),
            bytes_written: EncryptionHeader::SIZE as u64,
        })
    }

    /// Append plaintext, sealing every segment that is known not to be last.
    ///
    /// # Errors
    ///
    /// Propagates sealing and I/O errors.
    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() > SEGMENT_SIZE {
            let segment: Vec<u8> = self.buffer.drain(..SEGMENT_SIZE).collect();
            self.seal(&segment, false)?;
        }
        Ok(())
    }

    fn seal(&mut self, segment: &[u8], last: bool) -> Result<(), CryptoError> {
        let (nonce, ciphertext) = self.cipher.encrypt_segment(segment, last)?;
        self.inner.write_all(nonce.as_bytes())?;
        self.inner.write_all(&ciphertext)?;
        self.bytes_written += (NONCE_SIZE + ciphertext.len()) as u64;
        Ok(())
    }

    /// Seal the final segment and return the inner writer.
    ///
    /// An empty stream still produces one (empty) final segment.
    ///
    /// # Errors
    ///
    /// Propagates sealing and I/O errors.
    pub fn finish(mut self) -> Result<W, CryptoError> {
        let remaining = std::mem::take(&mut self.buffer);
        self.seal(&remaining, true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Total bytes written to the inner writer, header included.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Segments sealed so far.
    #[must_use]
    pub fn segments_written(&self) -> u64 {
        self.cipher.segments_sealed()
    }
}

impl<W: Write> Write for SegmentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming reader opening segments sequentially.
///
/// Holds one raw segment of look-ahead so it knows which segment is final.
/// [`Read`] errors carry the [`CryptoError`] as their inner error.
pub struct SegmentReader<R: Read> {
    inner: R,
    cipher: SegmentCipher,
    lookahead: Option<Vec<u8>>,
    plaintext: Vec<u8>,
    position: usize,
    finished: bool,
}

impl<R: Read> SegmentReader<R> {
    /// Read the header from `inner` and open it with the recipient key.
    ///
    /// # Errors
    ///
    /// Returns header parsing or key-exchange errors.
    pub fn open(mut inner: R, recipient: &RecipientKey) -> Result<(Self, EncryptionHeader), CryptoError> {
        let header = EncryptionHeader::read_from(&mut inner)?;
        let key = recipient.open_header(&header)?;
        Ok((Self::new(inner, &header, &key), header))
    }

    /// Create a reader positioned just after an already-read header.
    #[must_use]
    pub fn new(inner: R, header: &EncryptionHeader, key: &SessionKey) -> Self {
        Self {
            inner,
            cipher: SegmentCipher::new(key, &header.digest()),
            lookahead: None,
            plaintext: Vec::new(),
            position: 0,
            finished: false,
        }
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, CryptoError> {
        let mut raw = Vec::with_capacity(FULL_SEALED_SEGMENT);
        (&mut self.inner)
            .take(FULL_SEALED_SEGMENT as u64)
            .read_to_end(&mut raw)?;
        Ok(raw)
    }

    /// Open the next segment, or `None` after the final one.
    ///
    /// # Errors
    ///
    /// - `Truncated` if the stream ends before a final-flagged segment
    /// - `SegmentAuthentication` if a segment fails verification
    pub fn next_segment(&mut self) -> Result<Option<Vec<u8>>, CryptoError> {
        if self.finished {
            return Ok(None);
        }

        let raw = match self.lookahead.take() {
            Some(raw) => raw,
            None => self.read_raw()?,
        };
        let segments = self.cipher.segments_opened();
        if raw.is_empty() {
            return Err(CryptoError::Truncated { segments });
        }
        if raw.len() < SEALED_SEGMENT_OVERHEAD {
            return Err(CryptoError::SegmentAuthentication { index: segments });
        }

        let last = if raw.len() < FULL_SEALED_SEGMENT {
            true
        } else {
            let next = self.read_raw()?;
            let last = next.is_empty();
            if !last {
                self.lookahead = Some(next);
            }
            last
        };

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes)
            .ok_or(CryptoError::SegmentAuthentication { index: segments })?;

        match self.cipher.decrypt_segment(&nonce, ciphertext, last) {
            Ok(plaintext) => {
                self.finished = last;
                Ok(Some(plaintext))
            }
            Err(_) if last && self.cipher.opens_as_intermediate(&nonce, ciphertext) => {
                Err(CryptoError::Truncated {
                    segments: segments + 1,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Segments opened so far.
    #[must_use]
    pub fn segments_read(&self) -> u64 {
        self.cipher.segments_opened()
    }

    /// Whether the final segment has been opened.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<R: Read> Read for SegmentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position == self.plaintext.len() {
            match self.next_segment().map_err(io::Error::other)? {
                Some(plaintext) => {
                    self.plaintext = plaintext;
                    self.position = 0;
                }
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.plaintext.len() - self.position);
        buf[..n].copy_from_slice(&self.plaintext[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}
