//! Fuzz target for encryption header parsing

#![no_main]

use ferry_crypto::EncryptionHeader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = EncryptionHeader::from_bytes(data) {
        // Anything that parses must serialize back to the same bytes
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..], &data[..EncryptionHeader::SIZE]);
        let _ = header.digest();
    }
});
