//! Passphrase-sealed private key storage.
//!
//! # Format
//!
//! ```text
//! magic "FERRYK01" (8) || memory_kib (u32 LE) || time_cost (u32 LE)
//!   || parallelism (u32 LE) || salt (16) || nonce (24) || ciphertext (32 + 16)
//! ```
//!
//! The sealing key is derived with Argon2id from the passphrase and salt;
//! the private key is encrypted with XChaCha20-Poly1305 using the preceding
//! bytes as associated data, so the stored cost parameters cannot be
//! downgraded without detection. Blobs whose parameters exceed
//! [`SealParams::MAX`] are refused before any derivation work is done.

use crate::CryptoError;
use crate::aead::{AeadKey, NONCE_SIZE, Nonce, TAG_SIZE};
use crate::random::{random_16, random_24};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Magic prefix of a sealed key blob.
pub const SEALED_KEY_MAGIC: &[u8; 8] = b"FERRYK01";

/// Minimum accepted passphrase length in characters.
pub const MIN_PASSPHRASE_LEN: usize = 8;

const SALT_SIZE: usize = 16;
const PARAMS_SIZE: usize = 12;
const PREFIX_SIZE: usize = SEALED_KEY_MAGIC.len() + PARAMS_SIZE + SALT_SIZE + NONCE_SIZE;

/// Total size of a sealed key blob.
pub const SEALED_KEY_SIZE: usize = PREFIX_SIZE + 32 + TAG_SIZE;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub time_cost: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for SealParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl SealParams {
    /// Highest cost accepted when sealing or opening: 1 GiB, 16 passes,
    /// 16 lanes.
    pub const MAX: Self = Self {
        memory_kib: 1 << 20,
        time_cost: 16,
        parallelism: 16,
    };

    /// Minimal-cost parameters. Only suitable for tests.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            memory_kib: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Whether every cost is non-zero and no greater than [`Self::MAX`].
    #[must_use]
    pub fn within_limits(&self) -> bool {
        (1..=Self::MAX.memory_kib).contains(&self.memory_kib)
            && (1..=Self::MAX.time_cost).contains(&self.time_cost)
            && (1..=Self::MAX.parallelism).contains(&self.parallelism)
    }

    fn derive(&self, passphrase: &str, salt: &[u8]) -> Result<AeadKey, CryptoError> {
        if !self.within_limits() {
            return Err(CryptoError::KeyDerivation);
        }
        let params = Params::new(self.memory_kib, self.time_cost, self.parallelism, Some(32))
            .map_err(|_| CryptoError::KeyDerivation)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut derived = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, derived.as_mut())
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(AeadKey::new(*derived))
    }
}

/// Reject passphrases shorter than [`MIN_PASSPHRASE_LEN`] characters.
///
/// # Errors
///
/// Returns `CryptoError::Passphrase` if the passphrase is too short.
pub fn check_passphrase(passphrase: &str) -> Result<(), CryptoError> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(CryptoError::Passphrase(format!(
            "must be at least {MIN_PASSPHRASE_LEN} characters"
        )));
    }
    Ok(())
}

/// Seal a 32-byte private key under a passphrase.
///
/// # Errors
///
/// Returns `Passphrase` for short passphrases, `KeyDerivation` for invalid
/// Argon2 parameters, or the underlying random/AEAD failure.
pub fn seal_private_key(
    private_key: &[u8; 32],
    passphrase: &str,
    params: &SealParams,
) -> Result<Vec<u8>, CryptoError> {
    check_passphrase(passphrase)?;

    let salt = random_16()?;
    let nonce = Nonce::from_bytes(random_24()?);

    let mut blob = Vec::with_capacity(SEALED_KEY_SIZE);
    blob.extend_from_slice(SEALED_KEY_MAGIC);
    blob.extend_from_slice(&params.memory_kib.to_le_bytes());
    blob.extend_from_slice(&params.time_cost.to_le_bytes());
    blob.extend_from_slice(&params.parallelism.to_le_bytes());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(nonce.as_bytes());

    let key = params.derive(passphrase, &salt)?;
    let ciphertext = key.encrypt(&nonce, private_key, &blob)?;
    blob.extend_from_slice(&ciphertext);

    Ok(blob)
}

/// Open a sealed key blob.
///
/// # Errors
///
/// Returns `SealedKey` if the blob is malformed, its cost parameters are
/// out of range, or the passphrase is wrong.
pub fn open_private_key(blob: &[u8], passphrase: &str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    if blob.len() != SEALED_KEY_SIZE {
        return Err(CryptoError::SealedKey("wrong length"));
    }
    if &blob[..8] != SEALED_KEY_MAGIC {
        return Err(CryptoError::SealedKey("wrong format"));
    }

    let read_u32 = |offset: usize| {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&blob[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    };
    let params = SealParams {
        memory_kib: read_u32(8),
        time_cost: read_u32(12),
        parallelism: read_u32(16),
    };
    if !params.within_limits() {
        return Err(CryptoError::SealedKey("cost parameters out of range"));
    }

    let salt_start = SEALED_KEY_MAGIC.len() + PARAMS_SIZE;
    let nonce_start = salt_start + SALT_SIZE;
    let salt = &blob[salt_start..nonce_start];
    let nonce = Nonce::from_slice(&blob[nonce_start..PREFIX_SIZE])
        .ok_or(CryptoError::SealedKey("wrong format"))?;

    let key = params.derive(passphrase, salt)?;
    let plaintext = Zeroizing::new(
        key.decrypt(&nonce, &blob[PREFIX_SIZE..], &blob[..PREFIX_SIZE])
            .map_err(|_| CryptoError::SealedKey("incorrect passphrase or corrupted key"))?,
    );

    let mut private_key = Zeroizing::new([0u8; 32]);
    private_key.copy_from_slice(&plaintext);
    Ok(private_key)
}
