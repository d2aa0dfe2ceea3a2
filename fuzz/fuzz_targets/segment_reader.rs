//! Fuzz target for sealed stream reading
//!
//! Arbitrary input must never panic and never yield plaintext from a
//! stream that was not sealed for the fixed recipient.

#![no_main]

use ferry_crypto::RecipientKey;
use ferry_crypto::aead::SegmentReader;
use libfuzzer_sys::fuzz_target;
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let recipient = RecipientKey::from_bytes([7u8; 32]);
    if let Ok((mut reader, _header)) = SegmentReader::open(Cursor::new(data), &recipient) {
        let mut out = Vec::new();
        let _ = reader.read_to_end(&mut out);
    }
});
