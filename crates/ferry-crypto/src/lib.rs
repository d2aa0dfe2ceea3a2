//! # FERRY Crypto
//!
//! Cryptographic primitives for the FERRY delivery client.
//!
//! ## Components
//!
//! - **Key Exchange:** Ephemeral X25519 sender keypair per file, recipient
//!   keypair held long-term
//! - **Key Wrapping:** HKDF-BLAKE3 key-encryption key, XChaCha20-Poly1305 wrap
//!   of a random session key
//! - **Segment AEAD:** XChaCha20-Poly1305 over 64 KiB segments with
//!   position-bound associated data
//! - **Key Storage:** Argon2id + XChaCha20-Poly1305 sealed private keys
//!
//! ## Artifact Layout
//!
//! ```text
//! +------------------+-----------------------------+-----------------------------+
//! | EncryptionHeader | nonce | ciphertext | tag    | nonce | ciphertext | tag    | ...
//! |    129 bytes     |  24   |   <= 64Ki  |  16    |  24   |   <= 64Ki  |  16    |
//! +------------------+-----------------------------+-----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod exchange;
pub mod hash;
pub mod kdf;
pub mod keystore;
pub mod random;

pub use exchange::{
    EncryptionHeader, EncryptionMethod, EphemeralKeyExchange, KeyPairHandle, PassphraseProvider,
    RecipientKey, SessionKey, StaticPassphrase,
};
pub use keystore::SealParams;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Cryptographic errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key material had the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Public key could not be parsed
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Diffie-Hellman produced a low-order (all-zero) shared secret
    #[error("non-contributory key exchange")]
    NonContributory,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication tag mismatch)
    #[error("decryption failed")]
    DecryptionFailed,

    /// A sealed segment failed authentication
    #[error("segment {index} failed authentication")]
    SegmentAuthentication {
        /// Zero-based segment index
        index: u64,
    },

    /// The segment stream ended before the final-flagged segment
    #[error("stream truncated after {segments} segments")]
    Truncated {
        /// Segments successfully opened before the stream ended
        segments: u64,
    },

    /// Encryption header was malformed
    #[error("invalid encryption header: {0}")]
    InvalidHeader(&'static str),

    /// Encryption header named a method this build does not know
    #[error("unsupported encryption method: {0:#04x}")]
    UnsupportedMethod(u8),

    /// Sealed private key blob was malformed or could not be opened
    #[error("sealed key: {0}")]
    SealedKey(&'static str),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Passphrase was rejected or could not be obtained
    #[error("passphrase: {0}")]
    Passphrase(String),

    /// OS random number generator failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Segment counter would wrap
    #[error("segment counter exhausted")]
    NonceExhausted,

    /// Operation is not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// I/O error while reading or writing a sealed stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Whether this error means ciphertext failed authentication.
    ///
    /// Callers treat these as tamper indicators rather than format errors.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailed | Self::SegmentAuthentication { .. } | Self::Truncated { .. }
        )
    }
}
