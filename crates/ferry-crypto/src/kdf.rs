//! Key derivation with domain-separated labels.
//!
//! Builds on the HKDF-BLAKE3 primitives in [`crate::hash`]. Each derivation
//! uses a unique label so keys derived for different purposes are
//! cryptographically independent.

use crate::hash::{hkdf_expand, hkdf_extract};
use zeroize::{Zeroize, Zeroizing};

/// KDF labels for domain separation.
pub mod labels {
    /// Label for the key-encryption key that wraps a file session key.
    pub const KEY_WRAP: &[u8] = b"ferry-v1-key-wrap";
    /// `blake3::derive_key` context for the header digest bound into every segment's AAD.
    pub const HEADER_DIGEST: &str = "ferry-v1 header-digest";
    /// `blake3::derive_key` context for checksum keys derived from a project identifier.
    pub const CHECKSUM_CONTEXT: &str = "ferry-v1 checksum-key";
}

/// Derive the key-encryption key for a session-key wrap.
///
/// The DH shared secret is extracted with the header salt, then expanded
/// under [`labels::KEY_WRAP`] with both public keys appended to the info so
/// the wrap is bound to this exact pair.
#[must_use]
pub fn derive_wrap_key(
    shared_secret: &[u8; 32],
    salt: &[u8; 16],
    sender_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Zeroizing<[u8; 32]> {
    let mut prk = hkdf_extract(salt, shared_secret);

    let mut info = Vec::with_capacity(labels::KEY_WRAP.len() + 64);
    info.extend_from_slice(labels::KEY_WRAP);
    info.extend_from_slice(sender_public);
    info.extend_from_slice(recipient_public);

    let mut out = Zeroizing::new([0u8; 32]);
    hkdf_expand(&prk, &info, out.as_mut());
    prk.zeroize();
    out
}

/// Derive a 32-byte checksum key from a delivery context string.
#[must_use]
pub fn derive_checksum_key(context: &str) -> [u8; 32] {
    blake3::derive_key(labels::CHECKSUM_CONTEXT, context.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_key_deterministic() {
        let a = derive_wrap_key(&[1u8; 32], &[2u8; 16], &[3u8; 32], &[4u8; 32]);
        let b = derive_wrap_key(&[1u8; 32], &[2u8; 16], &[3u8; 32], &[4u8; 32]);
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_wrap_key_bound_to_inputs() {
        let base = derive_wrap_key(&[1u8; 32], &[2u8; 16], &[3u8; 32], &[4u8; 32]);
        let other_salt = derive_wrap_key(&[1u8; 32], &[9u8; 16], &[3u8; 32], &[4u8; 32]);
        let swapped = derive_wrap_key(&[1u8; 32], &[2u8; 16], &[4u8; 32], &[3u8; 32]);
        assert_ne!(*base, *other_salt);
        assert_ne!(*base, *swapped);
    }

    #[test]
    fn test_checksum_key_context() {
        assert_eq!(derive_checksum_key("proj-1"), derive_checksum_key("proj-1"));
        assert_ne!(derive_checksum_key("proj-1"), derive_checksum_key("proj-2"));
    }
}
