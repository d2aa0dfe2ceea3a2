//! Per-run staging directory.
//!
//! ```text
//! <staging_root>/ferry_<timestamp>/
//!     files/   artifacts awaiting upload, or downloads awaiting restore
//!     meta/    ferry-manifest.json, failed.json
//! ```

use crate::error::{Result, TransferError};
use chrono::Utc;
use ferry_files::walk::safe_relative;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One failed file, as written to `meta/failed.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Logical file name
    pub name: String,
    /// Error variant name
    pub kind: String,
    /// Error message
    pub message: String,
}

impl FailureRecord {
    /// Build from a per-file error.
    #[must_use]
    pub fn new(name: impl Into<String>, error: &TransferError) -> Self {
        Self {
            name: name.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Staging area of one run.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// File name of the failure list inside `meta/`.
    pub const FAILED_FILE: &'static str = "failed.json";

    /// Create a fresh staging area below `staging_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn create(staging_root: &Path) -> Result<Self> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut root = staging_root.join(format!("ferry_{stamp}"));
        let mut attempt = 1;
        while root.exists() {
            root = staging_root.join(format!("ferry_{stamp}_{attempt}"));
            attempt += 1;
        }

        fs::create_dir_all(root.join("files"))?;
        fs::create_dir_all(root.join("meta"))?;
        debug!("Created staging area {}", root.display());
        Ok(Self { root })
    }

    /// Run directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding artifacts.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    /// Directory holding run metadata.
    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// Directory holding the passphrase-sealed ephemeral key of each
    /// encrypted artifact. Created on first use.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.meta_dir().join("keys")
    }

    /// Staging path for the artifact with `remote_name`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `remote_name` would resolve outside
    /// `files/`.
    pub fn artifact_path(&self, remote_name: &str) -> Result<PathBuf> {
        let relative = safe_relative(remote_name).ok_or_else(|| {
            TransferError::Configuration(format!("unsafe object key: {remote_name}"))
        })?;
        Ok(self.files_dir().join(relative))
    }

    /// Remove an artifact once it is no longer needed.
    pub fn discard(&self, artifact: &Path) {
        match fs::remove_file(artifact) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged {}: {e}", artifact.display()),
        }
    }

    /// Write `meta/failed.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_failures(&self, failures: &[FailureRecord]) -> Result<PathBuf> {
        let path = self.meta_dir().join(Self::FAILED_FILE);
        let json = serde_json::to_string_pretty(failures)
            .map_err(|e| TransferError::Pipeline(e.to_string()))?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Remove emptied artifact directories left after a run.
    pub fn prune(&self) {
        prune_empty(&self.files_dir());
    }
}

/// Remove empty directories bottom-up, keeping `dir` itself.
fn prune_empty(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            prune_empty(&path);
            let _ = fs::remove_dir(&path);
        }
    }
}
