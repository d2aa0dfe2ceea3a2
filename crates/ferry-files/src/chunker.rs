//! Sequential file chunking.
//!
//! Source files are never read whole: the protect pipeline pulls one chunk
//! at a time and pushes it through every active stage before reading the
//! next.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Chunker reading fixed-size chunks until end of input.
pub struct FileChunker<R = File> {
    reader: BufReader<R>,
    chunk_size: usize,
}

impl FileChunker<File> {
    /// Open a file for chunking.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or if `chunk_size` is
    /// zero.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Self> {
        Self::from_reader(File::open(path)?, chunk_size)
    }
}

impl<R: Read> FileChunker<R> {
    /// Chunk an arbitrary reader.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `chunk_size` is zero.
    pub fn from_reader(reader: R, chunk_size: usize) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be non-zero",
            ));
        }
        Ok(Self {
            reader: BufReader::with_capacity(chunk_size, reader),
            chunk_size,
        })
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read the next chunk into `buffer`, replacing its contents.
    ///
    /// Returns the number of bytes read; zero means end of input. Only the
    /// final chunk may be shorter than the chunk size.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the source fails.
    pub fn read_chunk_into(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize> {
        buffer.clear();
        (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(buffer)
    }
}
