//! Shared fixtures for FERRY integration tests.

use ferry_core::{DeliveryConfig, UploadKeys};
use ferry_crypto::{RecipientKey, SealParams, StaticPassphrase};
use ferry_files::ChecksumKey;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Passphrase used for every sealed key in the tests
pub const PASSPHRASE: &str = "integration-passphrase";

/// Temporary layout: source files, a bucket, staging and a restore target.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    /// Create an empty fixture.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["source", "bucket", "staging", "restored"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    /// Root of the fixture
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding input files
    pub fn source(&self) -> PathBuf {
        self.path().join("source")
    }

    /// Bucket directory
    pub fn bucket(&self) -> PathBuf {
        self.path().join("bucket")
    }

    /// Staging root
    pub fn staging(&self) -> PathBuf {
        self.path().join("staging")
    }

    /// Restore destination
    pub fn restored(&self) -> PathBuf {
        self.path().join("restored")
    }

    /// Write `data` below the source directory and return its path.
    pub fn write(&self, relative: &str, data: &[u8]) -> PathBuf {
        let path = self.source().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Delivery settings with cheap key sealing and this fixture's staging.
    pub fn config(&self) -> DeliveryConfig {
        DeliveryConfig {
            staging_root: self.staging(),
            seal_params: SealParams::testing(),
            ..DeliveryConfig::default()
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Text that compresses well: numbered log-style lines.
pub fn compressible_bytes(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len + 64);
    let mut line = 0u64;
    while data.len() < len {
        data.extend_from_slice(
            format!("{line:08} INFO delivery worker finished segment batch\n").as_bytes(),
        );
        line += 1;
    }
    data.truncate(len);
    data
}

/// Incompressible bytes from a fixed seed.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// Checksum key shared by uploads and downloads in one test.
pub fn checksum_key() -> ChecksumKey {
    ChecksumKey::derive("ferry-integration-tests")
}

/// Upload keys addressed to `recipient`.
pub fn upload_keys(recipient: &RecipientKey) -> UploadKeys {
    UploadKeys {
        recipient_public: recipient.public_key(),
        passphrase: Arc::new(StaticPassphrase::new(PASSPHRASE)),
    }
}
