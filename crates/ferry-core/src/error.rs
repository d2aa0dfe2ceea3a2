//! Error types for delivery runs

use crate::transport::TransportError;
use ferry_files::PipelineError;
use thiserror::Error;

/// Errors that can occur during a delivery.
///
/// `Configuration` is fatal before any work starts. Every other variant is
/// attached to the one file it occurred on and never unwinds the scheduler.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Keypair generation, key agreement or header opening failed
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    /// A segment failed authentication or the artifact was truncated
    #[error("Authentication tag verification failed: {0}")]
    AuthenticationTag(String),

    /// Malformed compressed stream
    #[error("Compression format error: {0}")]
    CompressionFormat(String),

    /// Object-store operation failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Restored bytes do not match the recorded digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest recorded at protect time
        expected: String,
        /// Digest of the restored bytes
        actual: String,
    },

    /// The run was cancelled before this file completed
    #[error("Cancelled")]
    Cancelled,

    /// Remote key or local destination already exists and overwrite is off
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Input path or manifest entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other pipeline failure
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Blocking task failed to complete
    #[error("Task join error: {0}")]
    TaskJoin(String),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Short machine-readable name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Configuration(_) => "configuration",
            TransferError::KeyExchange(_) => "key_exchange",
            TransferError::AuthenticationTag(_) => "authentication_tag",
            TransferError::CompressionFormat(_) => "compression_format",
            TransferError::Transport(_) => "transport",
            TransferError::ChecksumMismatch { .. } => "checksum_mismatch",
            TransferError::Cancelled => "cancelled",
            TransferError::AlreadyExists(_) => "already_exists",
            TransferError::NotFound(_) => "not_found",
            TransferError::Pipeline(_) => "pipeline",
            TransferError::TaskJoin(_) => "task_join",
            TransferError::Io(_) => "io",
        }
    }
}

impl From<PipelineError> for TransferError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::KeyExchange(e) => TransferError::KeyExchange(e.to_string()),
            PipelineError::MissingKey(what) => TransferError::KeyExchange(format!("missing {what}")),
            PipelineError::AuthenticationTag(e) => TransferError::AuthenticationTag(e.to_string()),
            PipelineError::CompressionFormat(msg) => TransferError::CompressionFormat(msg),
            PipelineError::ChecksumMismatch { expected, actual } => {
                TransferError::ChecksumMismatch { expected, actual }
            }
            PipelineError::Cancelled => TransferError::Cancelled,
            PipelineError::Io(e) => TransferError::Io(e),
            other @ (PipelineError::Encryption(_)
            | PipelineError::Checksum(_)
            | PipelineError::Incomplete(_)) => TransferError::Pipeline(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransferError::TaskJoin(err.to_string())
    }
}

/// Result type for delivery operations
pub type Result<T> = std::result::Result<T, TransferError>;
