//! Fuzz target for sealed private key blobs

#![no_main]

use ferry_crypto::keystore::open_private_key;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Cost parameters come from the blob; skip blobs asking for real work
    if data.len() >= 16 {
        let memory_kib = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let time_cost = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        if memory_kib > 1024 || time_cost > 2 {
            return;
        }
    }
    let _ = open_private_key(data, "fuzzing-passphrase");
});
