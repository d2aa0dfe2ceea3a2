//! Transfer records and the delivery manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Delivery status of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Artifact produced and staged
    Processed,
    /// Artifact stored at its remote key
    Uploaded,
    /// Artifact fetched and restored
    Downloaded,
}

/// Checksums, algorithms and sizes of one delivered file.
///
/// Built by [`TransferRecordBuilder`] once every stage finished; fields are
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    remote_name: String,
    original_checksum: String,
    compressed_checksum: Option<String>,
    encrypted_checksum: Option<String>,
    final_path: PathBuf,
    compression_algorithm: Option<String>,
    encryption_algorithm: Option<String>,
    size_original: u64,
    size_stored: u64,
    status: TransferStatus,
}

impl TransferRecord {
    /// Remote object key.
    #[must_use]
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Hex digest of the source bytes.
    #[must_use]
    pub fn original_checksum(&self) -> &str {
        &self.original_checksum
    }

    /// Hex digest of the compressed stream, when compression applied.
    #[must_use]
    pub fn compressed_checksum(&self) -> Option<&str> {
        self.compressed_checksum.as_deref()
    }

    /// Hex digest of the encrypted artifact, when encryption applied.
    #[must_use]
    pub fn encrypted_checksum(&self) -> Option<&str> {
        self.encrypted_checksum.as_deref()
    }

    /// Where the artifact was written.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Compression algorithm name, if compressed.
    #[must_use]
    pub fn compression_algorithm(&self) -> Option<&str> {
        self.compression_algorithm.as_deref()
    }

    /// Encryption algorithm name, if encrypted.
    #[must_use]
    pub fn encryption_algorithm(&self) -> Option<&str> {
        self.encryption_algorithm.as_deref()
    }

    /// Whether the artifact is compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compression_algorithm.is_some()
    }

    /// Whether the artifact is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encryption_algorithm.is_some()
    }

    /// Source size in bytes.
    #[must_use]
    pub fn size_original(&self) -> u64 {
        self.size_original
    }

    /// Artifact size in bytes.
    #[must_use]
    pub fn size_stored(&self) -> u64 {
        self.size_stored
    }

    /// Delivery status.
    #[must_use]
    pub fn status(&self) -> &TransferStatus {
        &self.status
    }

    /// Copy of this record with a new status.
    #[must_use]
    pub fn with_status(&self, status: TransferStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Copy of this record pointing at a new artifact location.
    #[must_use]
    pub fn with_final_path(&self, final_path: PathBuf) -> Self {
        Self {
            final_path,
            ..self.clone()
        }
    }
}

/// Incremental builder for [`TransferRecord`].
#[derive(Debug, Default)]
pub struct TransferRecordBuilder {
    remote_name: String,
    original_checksum: Option<String>,
    compressed_checksum: Option<String>,
    encrypted_checksum: Option<String>,
    compression_algorithm: Option<String>,
    encryption_algorithm: Option<String>,
    size_original: u64,
}

impl TransferRecordBuilder {
    /// Start a record for `remote_name`.
    #[must_use]
    pub fn new(remote_name: impl Into<String>) -> Self {
        Self {
            remote_name: remote_name.into(),
            ..Self::default()
        }
    }

    /// Set the original-stage digest and size.
    pub fn original(&mut self, checksum: String, size: u64) -> &mut Self {
        self.original_checksum = Some(checksum);
        self.size_original = size;
        self
    }

    /// Set the compressed-stage digest and algorithm.
    pub fn compressed(&mut self, checksum: String, algorithm: &str) -> &mut Self {
        self.compressed_checksum = Some(checksum);
        self.compression_algorithm = Some(algorithm.to_string());
        self
    }

    /// Set the encrypted-stage digest and algorithm.
    pub fn encrypted(&mut self, checksum: String, algorithm: &str) -> &mut Self {
        self.encrypted_checksum = Some(checksum);
        self.encryption_algorithm = Some(algorithm.to_string());
        self
    }

    /// Finalize once the artifact is complete on disk.
    ///
    /// Returns `None` if the original digest was never recorded.
    #[must_use]
    pub fn finish(self, final_path: PathBuf, size_stored: u64) -> Option<TransferRecord> {
        Some(TransferRecord {
            remote_name: self.remote_name,
            original_checksum: self.original_checksum?,
            compressed_checksum: self.compressed_checksum,
            encrypted_checksum: self.encrypted_checksum,
            final_path,
            compression_algorithm: self.compression_algorithm,
            encryption_algorithm: self.encryption_algorithm,
            size_original: self.size_original,
            size_stored,
            status: TransferStatus::Processed,
        })
    }
}

/// Errors reading or writing a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// I/O failure
    #[error("manifest I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed JSON
    #[error("manifest format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// JSON delivery manifest: logical file name to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the delivery was produced
    pub created_at: DateTime<Utc>,
    /// Records keyed by logical name
    pub files: BTreeMap<String, TransferRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Object key under which a manifest is stored next to the artifacts.
    pub const REMOTE_KEY: &'static str = "ferry-manifest.json";

    /// Create an empty manifest stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    /// Add or replace a record.
    pub fn insert(&mut self, logical_name: impl Into<String>, record: TransferRecord) {
        self.files.insert(logical_name.into(), record);
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, logical_name: &str) -> Option<&TransferRecord> {
        self.files.get(logical_name)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write as pretty JSON, replacing any existing file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.part");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
