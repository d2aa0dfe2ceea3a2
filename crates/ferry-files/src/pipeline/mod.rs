//! Per-file transform pipelines.
//!
//! Protect and restore share one parametrized state machine:
//!
//! ```text
//! START -> HASH_ORIGINAL -> [COMPRESS -> HASH_COMPRESSED] -> [ENCRYPT -> HASH_ENCRYPTED] -> DONE
//!    \___________________________________ FAILED ___________________________________/
//! ```
//!
//! Bracketed stages run only when their [`StageToggles`] flag is set. Data
//! is streamed chunk by chunk through every active stage at once; the state
//! machine orders how stages are completed once the source is exhausted.
//! Every artifact is written to a `.part` file that is renamed on success
//! and deleted on failure.

pub mod protect;
pub mod restore;

pub use protect::ProtectPipeline;
pub use restore::{RestoreOutcome, RestorePipeline};

use crate::DEFAULT_CHUNK_SIZE;
use crate::checksum::ChecksumError;
use crate::compress::DEFAULT_COMPRESSION_LEVEL;
use ferry_crypto::{CryptoError, SealParams};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which optional stages run for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageToggles {
    /// Run the zstd stage
    pub compress: bool,
    /// Run the encryption stage
    pub encrypt: bool,
}

impl StageToggles {
    /// Compress and encrypt.
    #[must_use]
    pub fn sensitive() -> Self {
        Self {
            compress: true,
            encrypt: true,
        }
    }

    /// Compress only.
    #[must_use]
    pub fn non_sensitive() -> Self {
        Self {
            compress: true,
            encrypt: false,
        }
    }

    /// Toggles for a delivery's sensitivity flag.
    #[must_use]
    pub fn for_sensitivity(sensitive: bool) -> Self {
        if sensitive {
            Self::sensitive()
        } else {
            Self::non_sensitive()
        }
    }
}

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Nothing processed yet
    Start,
    /// Source bytes are being hashed
    HashOriginal,
    /// Compressor is being finished
    Compress,
    /// Compressed stream digest is being finalized
    HashCompressed,
    /// Final segment is being sealed
    Encrypt,
    /// Artifact digest is being finalized
    HashEncrypted,
    /// Artifact complete
    Done,
    /// Processing failed; partial output removed
    Failed,
}

impl PipelineState {
    /// Next state for the given toggles. Terminal states are fixed points.
    #[must_use]
    pub fn next(self, toggles: StageToggles) -> Self {
        match self {
            PipelineState::Start => PipelineState::HashOriginal,
            PipelineState::HashOriginal if toggles.compress => PipelineState::Compress,
            PipelineState::HashOriginal | PipelineState::HashCompressed if toggles.encrypt => {
                PipelineState::Encrypt
            }
            PipelineState::HashOriginal | PipelineState::HashCompressed => PipelineState::Done,
            PipelineState::Compress => PipelineState::HashCompressed,
            PipelineState::Encrypt => PipelineState::HashEncrypted,
            PipelineState::HashEncrypted | PipelineState::Done => PipelineState::Done,
            PipelineState::Failed => PipelineState::Failed,
        }
    }

    /// Whether no further transitions occur.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Every state visited from `Start` to `Done` for the given toggles.
    #[must_use]
    pub fn plan(toggles: StageToggles) -> Vec<Self> {
        let mut states = vec![PipelineState::Start];
        let mut state = PipelineState::Start;
        while !state.is_terminal() {
            state = state.next(toggles);
            states.push(state);
        }
        states
    }
}

/// State tracker for one file.
pub(crate) struct StateMachine<'a> {
    name: &'a str,
    toggles: StageToggles,
    state: PipelineState,
}

impl<'a> StateMachine<'a> {
    pub(crate) fn new(name: &'a str, toggles: StageToggles) -> Self {
        Self {
            name,
            toggles,
            state: PipelineState::Start,
        }
    }

    pub(crate) fn advance(&mut self) -> PipelineState {
        let next = self.state.next(self.toggles);
        debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
        next
    }

    pub(crate) fn fail(&mut self) {
        debug!("{}: {:?} -> Failed", self.name, self.state);
        self.state = PipelineState::Failed;
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bytes read from the source per chunk
    pub chunk_size: usize,
    /// zstd level (1-22)
    pub compression_level: i32,
    /// Argon2id cost for sealing ephemeral private keys
    pub seal_params: SealParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            seal_params: SealParams::default(),
        }
    }
}

/// Pipeline errors. Every variant is terminal for the file it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Keypair generation, key exchange or header opening failed
    #[error("key exchange failed: {0}")]
    KeyExchange(#[source] CryptoError),

    /// Sealing a segment failed
    #[error("encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    /// A segment failed authentication or the stream was truncated
    #[error("authentication failed: {0}")]
    AuthenticationTag(#[source] CryptoError),

    /// The compressed stream was malformed
    #[error("compression format error: {0}")]
    CompressionFormat(String),

    /// Restored bytes do not match the recorded digest
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest recorded at protect time
        expected: String,
        /// Digest of the restored bytes
        actual: String,
    },

    /// Checksum accumulator misuse
    #[error("checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    /// Encryption requested without the needed key material
    #[error("missing key material: {0}")]
    MissingKey(&'static str),

    /// Cancellation was observed between chunks
    #[error("cancelled")]
    Cancelled,

    /// Pipeline finished without producing every required value
    #[error("incomplete pipeline: {0}")]
    Incomplete(&'static str),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub(crate) fn from_sealing(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(io) => PipelineError::Io(io),
            other => PipelineError::Encryption(other),
        }
    }
}

/// Path of the temporary file for `final_path`.
#[must_use]
pub fn part_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    final_path.with_file_name(name)
}

/// Temporary output removed on drop unless committed.
pub(crate) struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    pub(crate) fn create(final_path: &Path) -> io::Result<(Self, File)> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let path = part_path(final_path);
        let file = File::create(&path)?;
        Ok((
            Self {
                path,
                committed: false,
            },
            file,
        ))
    }

    pub(crate) fn len(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub(crate) fn commit(mut self, final_path: &Path) -> io::Result<()> {
        fs::rename(&self.path, final_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial output {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.path.display()),
        }
    }
}
