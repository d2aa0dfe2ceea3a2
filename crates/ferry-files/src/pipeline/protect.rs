//! Protect: original file to staged artifact.

use super::{PartFile, PipelineConfig, PipelineError, PipelineState, StageToggles, StateMachine};
use crate::checksum::{ChecksumAccumulator, ChecksumKey, HashingWriter};
use crate::chunker::FileChunker;
use crate::compress::{StreamCompressor, ZSTD, compression_ratio, sniff_file};
use crate::record::{TransferRecord, TransferRecordBuilder};
use crate::walk::{FileUnit, safe_relative};
use ferry_crypto::aead::SegmentWriter;
use ferry_crypto::{EncryptionMethod, EphemeralKeyExchange, PassphraseProvider};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

type FileWriter = BufWriter<File>;

/// Where transformed bytes go.
enum Sink {
    Plain(FileWriter),
    Sealed(SegmentWriter<HashingWriter<FileWriter>>),
}

impl Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        match self {
            Sink::Plain(writer) => Ok(writer.write_all(bytes)?),
            Sink::Sealed(writer) => writer.update(bytes).map_err(PipelineError::from_sealing),
        }
    }

    /// Seal the final segment, if any, and return the file writer together
    /// with the artifact accumulator.
    fn finish(self) -> Result<(FileWriter, Option<ChecksumAccumulator>), PipelineError> {
        match self {
            Sink::Plain(writer) => Ok((writer, None)),
            Sink::Sealed(writer) => {
                let (file, acc) = writer
                    .finish()
                    .map_err(PipelineError::from_sealing)?
                    .into_parts();
                Ok((file, Some(acc)))
            }
        }
    }
}

/// Protect pipeline shared by every upload worker of a run.
pub struct ProtectPipeline {
    config: PipelineConfig,
    toggles: StageToggles,
    checksum_key: ChecksumKey,
    recipient_public: Option<[u8; 32]>,
    passphrase: Option<Arc<dyn PassphraseProvider>>,
    key_dir: Option<PathBuf>,
}

impl ProtectPipeline {
    /// Create a pipeline. Encryption additionally needs
    /// [`with_recipient`](Self::with_recipient).
    #[must_use]
    pub fn new(config: PipelineConfig, toggles: StageToggles, checksum_key: ChecksumKey) -> Self {
        Self {
            config,
            toggles,
            checksum_key,
            recipient_public: None,
            passphrase: None,
            key_dir: None,
        }
    }

    /// Set the recipient public key and the passphrase used to seal each
    /// file's ephemeral private key.
    #[must_use]
    pub fn with_recipient(
        mut self,
        recipient_public: [u8; 32],
        passphrase: Arc<dyn PassphraseProvider>,
    ) -> Self {
        self.recipient_public = Some(recipient_public);
        self.passphrase = Some(passphrase);
        self
    }

    /// Keep each file's passphrase-sealed ephemeral private key as
    /// `<dir>/<remote name>.key` next to the artifact.
    #[must_use]
    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = Some(dir.into());
        self
    }

    /// Requested stage toggles.
    #[must_use]
    pub fn toggles(&self) -> StageToggles {
        self.toggles
    }

    /// Transform `unit` into an artifact at `output`.
    ///
    /// `cancel` is polled between chunks. On any failure the partial output
    /// is removed and nothing exists at `output`. With a key directory set,
    /// an encrypted artifact is only committed together with its sealed key
    /// file.
    ///
    /// # Errors
    ///
    /// - `MissingKey` if encryption is enabled without recipient material
    /// - `KeyExchange` if keypair generation or key agreement fails
    /// - `Cancelled` if `cancel` was set
    /// - `Io`, `Encryption`, `CompressionFormat` on stage failures
    pub fn protect(
        &self,
        unit: &FileUnit,
        output: &Path,
        cancel: &AtomicBool,
    ) -> Result<TransferRecord, PipelineError> {
        let source = File::open(unit.local_path())?;
        self.protect_from(unit, source, output, cancel)
    }

    fn protect_from<R: Read>(
        &self,
        unit: &FileUnit,
        source: R,
        output: &Path,
        cancel: &AtomicBool,
    ) -> Result<TransferRecord, PipelineError> {
        let toggles = self.effective_toggles(unit)?;
        let mut machine = StateMachine::new(unit.logical_name(), toggles);

        match self.run(unit, source, output, toggles, cancel, &mut machine) {
            Ok(record) => Ok(record),
            Err(e) => {
                machine.fail();
                if matches!(e, PipelineError::Cancelled) {
                    warn!("{}: cancelled", unit.logical_name());
                }
                Err(e)
            }
        }
    }

    fn effective_toggles(&self, unit: &FileUnit) -> Result<StageToggles, PipelineError> {
        let mut toggles = self.toggles;
        if toggles.compress {
            if let Some(format) = sniff_file(unit.local_path())? {
                warn!(
                    "{} is already {format}-compressed, skipping compression",
                    unit.logical_name()
                );
                toggles.compress = false;
            }
        }
        Ok(toggles)
    }

    /// Open the output sink. For encrypted output this also returns the
    /// sealed ephemeral private key.
    fn open_sink(
        &self,
        writer: FileWriter,
        toggles: StageToggles,
    ) -> Result<(Sink, Option<Vec<u8>>), PipelineError> {
        if !toggles.encrypt {
            return Ok((Sink::Plain(writer), None));
        }

        let recipient = self
            .recipient_public
            .as_ref()
            .ok_or(PipelineError::MissingKey("recipient public key"))?;
        let provider = self
            .passphrase
            .as_ref()
            .ok_or(PipelineError::MissingKey("passphrase provider"))?;

        let keypair = EphemeralKeyExchange::generate(provider.as_ref(), &self.config.seal_params)
            .map_err(PipelineError::KeyExchange)?;
        let sealed_key = keypair.sealed_private_key().to_vec();
        let (session, header) = keypair
            .derive_session_key(recipient)
            .map_err(PipelineError::KeyExchange)?;

        let hashing = HashingWriter::new(writer, ChecksumAccumulator::new(&self.checksum_key));
        let sealed =
            SegmentWriter::new(hashing, &header, &session).map_err(PipelineError::from_sealing)?;
        Ok((Sink::Sealed(sealed), Some(sealed_key)))
    }

    /// Stage the sealed key file for `remote_name`. Nothing is written when
    /// no key directory is configured.
    fn stage_key(
        &self,
        remote_name: &str,
        sealed_key: Option<&[u8]>,
    ) -> Result<Option<(PartFile, PathBuf)>, PipelineError> {
        let (Some(dir), Some(blob)) = (self.key_dir.as_ref(), sealed_key) else {
            return Ok(None);
        };
        let relative = safe_relative(&format!("{remote_name}.key")).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsafe key file name for {remote_name}"),
            )
        })?;
        let path = dir.join(relative);
        let (part, mut file) = PartFile::create(&path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(blob)?;
        file.sync_all()?;
        Ok(Some((part, path)))
    }

    fn run<R: Read>(
        &self,
        unit: &FileUnit,
        source: R,
        output: &Path,
        toggles: StageToggles,
        cancel: &AtomicBool,
        machine: &mut StateMachine<'_>,
    ) -> Result<TransferRecord, PipelineError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }

        let mut chunker = FileChunker::from_reader(source, self.config.chunk_size)?;
        let (part, file) = PartFile::create(output)?;
        let (mut sink, sealed_key) = self.open_sink(BufWriter::new(file), toggles)?;

        let mut original = ChecksumAccumulator::new(&self.checksum_key);
        let mut compressed = toggles
            .compress
            .then(|| ChecksumAccumulator::new(&self.checksum_key));
        let mut compressor = if toggles.compress {
            Some(
                StreamCompressor::new(self.config.compression_level)
                    .map_err(|e| PipelineError::CompressionFormat(e.to_string()))?,
            )
        } else {
            None
        };

        machine.advance();
        let mut buffer = Vec::with_capacity(self.config.chunk_size);
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled);
            }
            if chunker.read_chunk_into(&mut buffer)? == 0 {
                break;
            }
            original.update(&buffer)?;

            match compressor.as_mut() {
                Some(c) => {
                    let out = c
                        .compress_chunk(&buffer)
                        .map_err(|e| PipelineError::CompressionFormat(e.to_string()))?;
                    if let Some(acc) = compressed.as_mut() {
                        acc.update(&out)?;
                    }
                    sink.write(&out)?;
                }
                None => sink.write(&buffer)?,
            }
        }

        let mut record = TransferRecordBuilder::new(unit.remote_name());
        record.original(original.finalize()?, original.bytes_consumed());

        let mut sink = Some(sink);
        let mut finished = None;
        let mut encrypted = None;
        loop {
            match machine.advance() {
                PipelineState::Compress => {
                    if let Some(c) = compressor.take() {
                        let tail = c
                            .finish()
                            .map_err(|e| PipelineError::CompressionFormat(e.to_string()))?;
                        if let Some(acc) = compressed.as_mut() {
                            acc.update(&tail)?;
                        }
                        if let Some(s) = sink.as_mut() {
                            s.write(&tail)?;
                        }
                    }
                }
                PipelineState::HashCompressed => {
                    if let Some(acc) = compressed.as_mut() {
                        record.compressed(acc.finalize()?, ZSTD);
                    }
                }
                PipelineState::Encrypt => {
                    if let Some(s) = sink.take() {
                        let (writer, acc) = s.finish()?;
                        finished = Some(writer);
                        encrypted = acc;
                    }
                }
                PipelineState::HashEncrypted => {
                    let acc = encrypted
                        .as_mut()
                        .ok_or(PipelineError::Incomplete("artifact checksum"))?;
                    record.encrypted(
                        acc.finalize()?,
                        EncryptionMethod::X25519Blake3XChaCha20Poly1305.name(),
                    );
                }
                PipelineState::Done => break,
                state => debug!("{}: nothing to finish in {state:?}", unit.logical_name()),
            }
        }

        let writer = match (finished, sink) {
            (Some(writer), _) => writer,
            (None, Some(s)) => s.finish()?.0,
            (None, None) => return Err(PipelineError::Incomplete("output writer")),
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        let size_stored = part.len()?;
        let key_file = self.stage_key(unit.remote_name(), sealed_key.as_deref())?;
        part.commit(output)?;
        if let Some((key_part, key_path)) = key_file {
            if let Err(e) = key_part.commit(&key_path) {
                if let Err(rm) = fs::remove_file(output) {
                    warn!("Failed to remove {}: {rm}", output.display());
                }
                return Err(e.into());
            }
            debug!("Stored sealed key at {}", key_path.display());
        }

        let record = record
            .finish(output.to_path_buf(), size_stored)
            .ok_or(PipelineError::Incomplete("original checksum"))?;

        info!(
            "Protected {} ({} -> {} bytes, ratio {:.2})",
            unit.logical_name(),
            record.size_original(),
            size_stored,
            compression_ratio(record.size_original(), size_stored)
        );
        Ok(record)
    }
}
