//! XChaCha20-Poly1305 primitives shared by segments, key wrapping and the
//! keystore.
//!
//! Every sealed value carries a 16-byte Poly1305 tag after the ciphertext.

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::ZeroizeOnDrop;

/// Poly1305 tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Extended nonce length.
pub const NONCE_SIZE: usize = 24;

/// Symmetric key length.
pub const KEY_SIZE: usize = 32;

/// Bytes of a segment nonce taken from the random prefix.
const PREFIX_LEN: usize = NONCE_SIZE - 8;

/// 24-byte extended nonce.
///
/// Segment nonces are a 16-byte random prefix followed by the segment index
/// as a little-endian `u64`, so a reader can check ordering before opening.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Wrap raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of exactly [`NONCE_SIZE`] bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; NONCE_SIZE]>::try_from(slice).ok().map(Self)
    }

    /// Build a segment nonce from its index and random prefix.
    #[must_use]
    pub fn from_counter(counter: u64, prefix: &[u8; PREFIX_LEN]) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        let (head, tail) = bytes.split_at_mut(PREFIX_LEN);
        head.copy_from_slice(prefix);
        tail.copy_from_slice(&counter.to_le_bytes());
        Self(bytes)
    }

    /// Segment index carried in the last 8 bytes.
    #[must_use]
    pub fn counter(&self) -> u64 {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[PREFIX_LEN..]);
        u64::from_le_bytes(tail)
    }

    /// Raw bytes as written to the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    fn as_xnonce(&self) -> &XNonce {
        XNonce::from_slice(&self.0)
    }
}

/// 32-byte symmetric key, zeroized on drop.
///
/// Used for one-off operations such as wrapping a session key. Streams that
/// seal many segments under one key hold a [`CachedAeadCipher`] instead.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of `slice`.
    ///
    /// # Errors
    ///
    /// `InvalidKeyLength` unless `slice` is exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        <[u8; KEY_SIZE]>::try_from(slice)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            })
    }

    /// Raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Seal `plaintext`, binding `aad`. Output is `plaintext.len() + TAG_SIZE`.
    ///
    /// # Errors
    ///
    /// `EncryptionFailed` if the primitive rejects the input.
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        CachedAeadCipher::new(self).encrypt(nonce, plaintext, aad)
    }

    /// Open `sealed` (ciphertext followed by its tag).
    ///
    /// # Errors
    ///
    /// `DecryptionFailed` if the tag does not verify.
    pub fn decrypt(&self, nonce: &Nonce, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        CachedAeadCipher::new(self).decrypt(nonce, sealed, aad)
    }
}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

/// Keyed cipher instance reused across the segments of one stream.
#[derive(Clone)]
pub struct CachedAeadCipher {
    inner: XChaCha20Poly1305,
}

impl CachedAeadCipher {
    /// Key a cipher from an [`AeadKey`].
    #[must_use]
    pub fn new(key: &AeadKey) -> Self {
        Self::from_bytes(key.as_bytes())
    }

    /// Key a cipher from raw bytes.
    #[must_use]
    pub fn from_bytes(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            inner: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Seal one message.
    ///
    /// # Errors
    ///
    /// `EncryptionFailed` if the primitive rejects the input.
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        self.inner
            .encrypt(nonce.as_xnonce(), payload)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open one message.
    ///
    /// # Errors
    ///
    /// `DecryptionFailed` if `sealed` is shorter than a tag or fails to verify.
    pub fn decrypt(&self, nonce: &Nonce, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let payload = Payload { msg: sealed, aad };
        self.inner
            .decrypt(nonce.as_xnonce(), payload)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
