//! Restore: delivered artifact back to the original file.
//!
//! Stages run in reverse: the header is read once, segments are opened in
//! order, the plaintext is decompressed and hashed on its way to a `.part`
//! file. The rename happens only after the final segment authenticated and,
//! when verification is on, the original digest matched.

use super::{PartFile, PipelineConfig, PipelineError, StageToggles};
use crate::checksum::{ChecksumAccumulator, ChecksumKey, HashingReader, digests_match};
use crate::compress::decompressing_reader;
use crate::record::TransferRecord;
use ferry_crypto::aead::SegmentReader;
use ferry_crypto::{CryptoError, RecipientKey};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Digest of the restored bytes
    pub original_checksum: String,
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// Whether the digest was compared against the record
    pub verified: bool,
}

/// Restore pipeline shared by every download worker of a run.
pub struct RestorePipeline {
    config: PipelineConfig,
    checksum_key: ChecksumKey,
    recipient: Option<Arc<RecipientKey>>,
    verify: bool,
}

impl RestorePipeline {
    /// Create a pipeline. Encrypted artifacts additionally need
    /// [`with_recipient`](Self::with_recipient).
    #[must_use]
    pub fn new(config: PipelineConfig, checksum_key: ChecksumKey, verify: bool) -> Self {
        Self {
            config,
            checksum_key,
            recipient: None,
            verify,
        }
    }

    /// Set the recipient private key used to open artifact headers.
    #[must_use]
    pub fn with_recipient(mut self, recipient: Arc<RecipientKey>) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Restore `artifact` to `destination` using the stages `record` lists.
    ///
    /// # Errors
    ///
    /// - `MissingKey` if the artifact is encrypted and no key was set
    /// - `KeyExchange` if the header is malformed or cannot be opened
    /// - `AuthenticationTag` if any segment fails or the stream is truncated
    /// - `CompressionFormat` if the decrypted stream is not valid zstd
    /// - `ChecksumMismatch` if verification is on and digests differ
    /// - `Cancelled` if `cancel` was set
    pub fn restore(
        &self,
        artifact: &Path,
        destination: &Path,
        record: &TransferRecord,
        cancel: &AtomicBool,
    ) -> Result<RestoreOutcome, PipelineError> {
        let toggles = StageToggles {
            compress: record.is_compressed(),
            encrypt: record.is_encrypted(),
        };

        let result = File::open(artifact)
            .map_err(PipelineError::from)
            .and_then(|file| {
                self.run(BufReader::new(file), destination, record, toggles, cancel)
            });
        match &result {
            Err(PipelineError::Cancelled) => warn!("{}: cancelled", record.remote_name()),
            Err(e) => debug!("{}: restore failed: {e}", record.remote_name()),
            Ok(_) => {}
        }
        result
    }

    fn open_source<'a, R: Read + 'a>(
        &self,
        source: R,
        label: &str,
        toggles: StageToggles,
    ) -> Result<Box<dyn Read + 'a>, PipelineError> {
        let decrypted: Box<dyn Read + 'a> = if toggles.encrypt {
            let recipient = self
                .recipient
                .as_ref()
                .ok_or(PipelineError::MissingKey("recipient private key"))?;
            let (reader, header) =
                SegmentReader::open(source, recipient).map_err(|e| match e {
                    CryptoError::Io(io) => PipelineError::Io(io),
                    other => PipelineError::KeyExchange(other),
                })?;
            debug!("{label}: opened {} header", header.method);
            Box::new(reader)
        } else {
            Box::new(source)
        };

        if toggles.compress {
            Ok(Box::new(decompressing_reader(decrypted).map_err(|e| {
                PipelineError::CompressionFormat(e.to_string())
            })?))
        } else {
            Ok(decrypted)
        }
    }

    fn run<R: Read>(
        &self,
        source: R,
        destination: &Path,
        record: &TransferRecord,
        toggles: StageToggles,
        cancel: &AtomicBool,
    ) -> Result<RestoreOutcome, PipelineError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }

        let mut reader = HashingReader::new(
            self.open_source(source, record.remote_name(), toggles)?,
            ChecksumAccumulator::new(&self.checksum_key),
        );
        let (part, file) = PartFile::create(destination)?;
        let mut writer = BufWriter::new(file);

        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled);
            }
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_read_error(e, toggles.compress)),
            };
            writer.write_all(&buffer[..n])?;
        }

        let (_, mut original) = reader.into_parts();
        let checksum = original.finalize()?;
        if self.verify && !digests_match(record.original_checksum(), &checksum) {
            return Err(PipelineError::ChecksumMismatch {
                expected: record.original_checksum().to_string(),
                actual: checksum,
            });
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        part.commit(destination)?;

        info!(
            "Restored {} ({} bytes{})",
            destination.display(),
            original.bytes_consumed(),
            if self.verify { ", verified" } else { "" }
        );
        Ok(RestoreOutcome {
            original_checksum: checksum,
            bytes_written: original.bytes_consumed(),
            verified: self.verify,
        })
    }
}

/// Map a read failure anywhere in the reader chain to the stage it came
/// from. Segment failures surface as `io::Error`s wrapping a `CryptoError`.
fn classify_read_error(err: io::Error, compressed: bool) -> PipelineError {
    let kind = err.kind();
    if !err.get_ref().is_some_and(|inner| inner.is::<CryptoError>()) {
        return match kind {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other
                if compressed =>
            {
                PipelineError::CompressionFormat(err.to_string())
            }
            _ => PipelineError::Io(err),
        };
    }

    match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
        Some(Ok(crypto)) => match *crypto {
            CryptoError::Io(io) => PipelineError::Io(io),
            other => PipelineError::AuthenticationTag(other),
        },
        _ => PipelineError::Io(io::Error::from(kind)),
    }
}
