//! OS-backed randomness for salts, nonces and keys.

use crate::CryptoError;

/// Fill `buf` from the operating system CSPRNG.
///
/// # Errors
///
/// [`CryptoError::RandomFailed`] if the OS source is unavailable.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// Key-sized random value.
///
/// # Errors
///
/// See [`fill_random`].
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    random_array()
}

/// Salt or nonce-prefix sized random value.
///
/// # Errors
///
/// See [`fill_random`].
pub fn random_16() -> Result<[u8; 16], CryptoError> {
    random_array()
}

/// Full extended-nonce sized random value.
///
/// # Errors
///
/// See [`fill_random`].
pub fn random_24() -> Result<[u8; 24], CryptoError> {
    random_array()
}
