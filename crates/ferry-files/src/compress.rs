//! Streaming Zstandard compression.
//!
//! One [`StreamCompressor`] spans a whole file: chunks are pushed in as they
//! are read and compressed bytes are drained after every push, so memory use
//! stays bounded regardless of file size. Restore pulls through
//! [`decompressing_reader`] symmetrically.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

/// Default compression level (good balance of speed and ratio)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Maximum compression level (best ratio, slowest)
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Name recorded for zstd-compressed artifacts.
pub const ZSTD: &str = "zstd";

/// Known signatures of already-compressed formats.
const FORMAT_MAGIC: &[(&[u8], &str)] = &[
    (b"(\xb5/\xfd", "zstd"),
    (b"\x1f\x8b", "gzip"),
    (b"BZh", "bzip2"),
    (b"\xfd7zXZ\x00", "xz"),
    (b"PK\x03\x04", "zip"),
    (b"Rar!\x1a\x07\x00", "rar4"),
    (b"Rar!\x1a\x07\x01\x00", "rar5"),
    (b"7z\xbc\xaf\x27\x1c", "7z"),
    (b"LZIP", "lzip"),
    (b"\x04\x22\x4d\x18", "lz4"),
    (b"\x60\xea", "arj"),
    (b"ZOO ", "zoo"),
    (b"MAr0\x00", "mar"),
    (b"DMS!", "dms"),
    (b"-lh", "lha"),
    (b"\x1a\x0b", "pak"),
];

const MAX_MAGIC_LEN: usize = 8;

/// Identify an already-compressed format from the first bytes of a file.
#[must_use]
pub fn detect_format(prefix: &[u8]) -> Option<&'static str> {
    FORMAT_MAGIC
        .iter()
        .find(|(magic, _)| prefix.starts_with(magic))
        .map(|(_, name)| *name)
}

/// Sniff a file on disk for a compressed-format signature.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn sniff_file(path: &Path) -> io::Result<Option<&'static str>> {
    let mut prefix = Vec::with_capacity(MAX_MAGIC_LEN);
    File::open(path)?
        .take(MAX_MAGIC_LEN as u64)
        .read_to_end(&mut prefix)?;
    Ok(detect_format(&prefix))
}

/// Push-based zstd compressor spanning one stream.
pub struct StreamCompressor {
    encoder: zstd::stream::write::Encoder<'static, Vec<u8>>,
}

impl StreamCompressor {
    /// Create a compressor. The level is clamped to 1..=22.
    ///
    /// # Errors
    ///
    /// Returns an error if the zstd context cannot be created.
    pub fn new(level: i32) -> io::Result<Self> {
        let level = level.clamp(1, MAX_COMPRESSION_LEVEL);
        let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), level)?;
        encoder.include_checksum(true)?;
        Ok(Self { encoder })
    }

    /// Feed a chunk and return whatever compressed output is ready.
    ///
    /// The returned buffer may be empty while zstd accumulates input.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn compress_chunk(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        self.encoder.write_all(chunk)?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    /// End the frame and return the remaining compressed output.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be completed.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        self.encoder.finish()
    }
}

/// Wrap a reader so it yields decompressed bytes.
///
/// Concatenated frames are decoded until `inner` reaches end of stream; a
/// stream ending mid-frame is an error.
///
/// # Errors
///
/// Returns an error if the zstd context cannot be created.
pub fn decompressing_reader<R: Read>(
    inner: R,
) -> io::Result<zstd::stream::read::Decoder<'static, BufReader<R>>> {
    zstd::stream::read::Decoder::new(inner)
}

/// Calculate the compression ratio
#[must_use]
pub fn compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if compressed_size == 0 {
        return 0.0;
    }
    original_size as f64 / compressed_size as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn compress_all(data: &[u8], chunk: usize) -> Vec<u8> {
        let mut compressor = StreamCompressor::new(DEFAULT_COMPRESSION_LEVEL).unwrap();
        let mut out = Vec::new();
        for piece in data.chunks(chunk) {
            out.extend(compressor.compress_chunk(piece).unwrap());
        }
        out.extend(compressor.finish().unwrap());
        out
    }

    #[test]
    fn test_stream_roundtrip() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 97) as u8).collect();
        let compressed = compress_all(&data, 65536);
        assert!(compressed.len() < data.len());

        let mut out = Vec::new();
        decompressing_reader(compressed.as_slice())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_stream_is_single_frame() {
        let data = vec![b'a'; 500_000];
        let streamed = compress_all(&data, 4096);
        // A single frame decodes with the one-shot API too.
        assert_eq!(zstd::decode_all(streamed.as_slice()).unwrap(), data);
        assert!(streamed.starts_with(b"(\xb5/\xfd"));
    }

    #[test]
    fn test_empty_stream() {
        let compressed = compress_all(&[], 1024);
        let mut out = Vec::new();
        decompressing_reader(compressed.as_slice())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_frame_fails() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let compressed = compress_all(&data, 8192);
        let cut = &compressed[..compressed.len() / 2];

        let mut out = Vec::new();
        assert!(
            decompressing_reader(cut)
                .unwrap()
                .read_to_end(&mut out)
                .is_err()
        );
    }

    #[test]
    fn test_garbage_fails() {
        let mut out = Vec::new();
        assert!(
            decompressing_reader(&b"definitely not zstd data"[..])
                .unwrap()
                .read_to_end(&mut out)
                .is_err()
        );
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"\x1f\x8b\x08\x00"), Some("gzip"));
        assert_eq!(detect_format(b"(\xb5/\xfd\x00"), Some("zstd"));
        assert_eq!(detect_format(b"BZh91AY"), Some("bzip2"));
        assert_eq!(detect_format(b"PK\x03\x04rest"), Some("zip"));
        assert_eq!(detect_format(b"plain text"), None);
        assert_eq!(detect_format(b""), None);
    }

    #[test]
    fn test_sniff_file() {
        let mut gz = NamedTempFile::new().unwrap();
        gz.write_all(b"\x1f\x8b\x08\x00\x00\x00").unwrap();
        assert_eq!(sniff_file(gz.path()).unwrap(), Some("gzip"));

        let mut txt = NamedTempFile::new().unwrap();
        txt.write_all(b"hello").unwrap();
        assert_eq!(sniff_file(txt.path()).unwrap(), None);
    }

    #[test]
    fn test_level_clamped() {
        assert!(StreamCompressor::new(0).is_ok());
        assert!(StreamCompressor::new(100).is_ok());
    }

    #[test]
    fn test_compression_ratio() {
        assert!((compression_ratio(1000, 250) - 4.0).abs() < 0.01);
        assert_eq!(compression_ratio(10, 0), 0.0);
    }
}
