//! Validated delivery settings.

use crate::error::{Result, TransferError};
use ferry_crypto::SealParams;
use ferry_files::compress::MAX_COMPRESSION_LEVEL;
use ferry_files::{DEFAULT_CHUNK_SIZE, PipelineConfig, StageToggles};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of concurrent workers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound on concurrent workers
pub const MAX_CONCURRENCY: usize = 32;

/// Upper bound on the read chunk size (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Settings for one delivery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Files processed at once (1-32)
    pub concurrency: usize,
    /// Stop admitting work after the first per-file failure
    pub break_on_fail: bool,
    /// Replace existing remote objects and local destinations
    pub overwrite: bool,
    /// Compare restored digests against the manifest
    pub verify: bool,
    /// Encrypt as well as compress
    pub sensitive: bool,
    /// zstd level (1-22)
    pub compression_level: i32,
    /// Bytes read per chunk
    pub chunk_size: usize,
    /// Directory under which each run creates its staging area
    pub staging_root: PathBuf,
    /// Argon2id cost for sealing ephemeral private keys
    pub seal_params: SealParams,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            break_on_fail: false,
            overwrite: false,
            verify: true,
            sensitive: true,
            compression_level: ferry_files::compress::DEFAULT_COMPRESSION_LEVEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            staging_root: std::env::temp_dir(),
            seal_params: SealParams::default(),
        }
    }
}

impl DeliveryConfig {
    /// Check every field is within range.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Configuration` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(TransferError::Configuration(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if !(1..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            return Err(TransferError::Configuration(format!(
                "compression_level must be between 1 and {MAX_COMPRESSION_LEVEL}, got {}",
                self.compression_level
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::Configuration(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.staging_root.as_os_str().is_empty() {
            return Err(TransferError::Configuration(
                "staging_root must not be empty".to_string(),
            ));
        }
        if !self.seal_params.within_limits() {
            let max = SealParams::MAX;
            return Err(TransferError::Configuration(format!(
                "seal_params must be non-zero and at most {} KiB, {} passes, {} lanes",
                max.memory_kib, max.time_cost, max.parallelism
            )));
        }
        Ok(())
    }

    /// Stages implied by the sensitivity flag.
    #[must_use]
    pub fn toggles(&self) -> StageToggles {
        StageToggles::for_sensitivity(self.sensitive)
    }

    /// Pipeline tuning derived from this configuration.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunk_size: self.chunk_size,
            compression_level: self.compression_level,
            seal_params: self.seal_params,
        }
    }
}
