//! Fuzz target for the streaming decompressor

#![no_main]

use ferry_files::compress::decompressing_reader;
use libfuzzer_sys::fuzz_target;
use std::io::Read;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut reader) = decompressing_reader(data) {
        let mut out = Vec::new();
        let _ = reader.by_ref().take(16 * 1024 * 1024).read_to_end(&mut out);
    }
});
