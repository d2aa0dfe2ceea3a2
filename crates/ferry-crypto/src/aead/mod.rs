//! Authenticated encryption.
//!
//! - [`cipher`]: XChaCha20-Poly1305 key, nonce and cached cipher types
//! - [`segment`]: segmented streaming encryption for whole files

pub mod cipher;
pub mod segment;

pub use cipher::{AeadKey, CachedAeadCipher, KEY_SIZE, NONCE_SIZE, Nonce, TAG_SIZE};
pub use segment::{
    SEALED_SEGMENT_OVERHEAD, SEGMENT_SIZE, SegmentCipher, SegmentReader, SegmentWriter,
    sealed_len,
};
