//! # FERRY Files
//!
//! Per-file processing for the FERRY delivery client.
//!
//! This crate provides:
//! - Work-list assembly from files, directories and path files
//! - Keyed BLAKE3 checksums computed at each pipeline stage
//! - Streaming zstd compression with already-compressed detection
//! - The protect (hash, compress, hash, encrypt, hash) and restore pipelines
//! - Transfer records and the JSON delivery manifest

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod chunker;
pub mod compress;
pub mod pipeline;
pub mod record;
pub mod walk;

pub use checksum::{ChecksumAccumulator, ChecksumError, ChecksumKey};
pub use pipeline::{
    PipelineConfig, PipelineError, PipelineState, ProtectPipeline, RestoreOutcome,
    RestorePipeline, StageToggles,
};
pub use record::{Manifest, TransferRecord, TransferStatus};
pub use walk::{FileUnit, WorkList};

/// Default chunk size (64 KiB), matching the encryption segment size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
