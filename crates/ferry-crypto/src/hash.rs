//! BLAKE3 hashing and HKDF-BLAKE3.
//!
//! HKDF is built from BLAKE3 keyed mode: extract keys BLAKE3 with a value
//! derived from the salt, expand runs the keyed XOF over the info string.

use zeroize::Zeroize;

const EXTRACT_CONTEXT: &str = "ferry-v1 hkdf-extract";

/// Hash arbitrary data with BLAKE3.
#[must_use]
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// HKDF extract: derive a pseudorandom key from input keying material.
///
/// `salt` may be any length, including empty.
#[must_use]
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    let mut salt_key = blake3::derive_key(EXTRACT_CONTEXT, salt);
    let prk = blake3::keyed_hash(&salt_key, ikm);
    salt_key.zeroize();
    *prk.as_bytes()
}

/// HKDF expand: fill `out` with key material bound to `info`.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], out: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_keyed(prk);
    hasher.update(info);
    hasher.finalize_xof().fill(out);
}
