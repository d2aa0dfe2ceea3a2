//! Whole upload and download runs.
//!
//! A [`Delivery`] ties a validated [`DeliveryConfig`] to a transport and
//! drives the scheduler over one work list. Uploads merge their records
//! into the manifest stored next to the artifacts; downloads read that
//! manifest for each file's stages and expected digests.

use crate::cancel::CancelFlag;
use crate::config::DeliveryConfig;
use crate::error::{Result, TransferError};
use crate::progress::{NoProgress, ProgressReporter};
use crate::scheduler::{RunSummary, SchedulerOptions, TransferScheduler};
use crate::staging::{FailureRecord, StagingArea};
use crate::transport::{Transport, TransportError};
use crate::worker::{DownloadWorker, UploadWorker};
use chrono::Utc;
use ferry_crypto::{PassphraseProvider, RecipientKey};
use ferry_files::record::ManifestError;
use ferry_files::{ChecksumKey, Manifest, ProtectPipeline, RestorePipeline, WorkList};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Key material for encrypting uploads.
#[derive(Clone)]
pub struct UploadKeys {
    /// Recipient X25519 public key
    pub recipient_public: [u8; 32],
    /// Passphrase sealing each file's ephemeral private key
    pub passphrase: Arc<dyn PassphraseProvider>,
}

/// Outcome of a run.
#[derive(Debug)]
pub struct DeliveryReport {
    /// Scheduler summary
    pub summary: RunSummary,
    /// Manifest after the run
    pub manifest: Manifest,
    /// Inputs that did not exist
    pub missing: Vec<PathBuf>,
    /// Staging area used by the run
    pub staging: StagingArea,
    /// `meta/failed.json`, if anything failed
    pub failures_file: Option<PathBuf>,
}

impl DeliveryReport {
    /// Whether every requested file was delivered.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.summary.is_success() && self.missing.is_empty()
    }
}

/// Delivery runs against one transport.
pub struct Delivery {
    config: DeliveryConfig,
    transport: Arc<dyn Transport>,
    checksum_key: ChecksumKey,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancelFlag,
}

impl Delivery {
    /// Create a delivery after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `config` is invalid.
    pub fn new(
        config: DeliveryConfig,
        transport: Arc<dyn Transport>,
        checksum_key: ChecksumKey,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            checksum_key,
            progress: Arc::new(NoProgress),
            cancel: CancelFlag::new(),
        })
    }

    /// Report progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Use an externally controlled cancellation flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            concurrency: self.config.concurrency,
            break_on_fail: self.config.break_on_fail,
        }
    }

    /// Protect and upload every unit of `work`, then publish the manifest.
    ///
    /// # Errors
    ///
    /// - `Configuration` if a sensitive delivery has no keys, or the remote
    ///   manifest records an object key outside the bucket root
    /// - `NotFound` if inputs are missing and break-on-fail is set
    /// - staging, manifest or transport errors outside per-file work
    pub async fn upload(&self, mut work: WorkList, keys: Option<UploadKeys>) -> Result<DeliveryReport> {
        if self.config.sensitive && keys.is_none() {
            return Err(TransferError::Configuration(
                "sensitive delivery requires a recipient public key and passphrase".to_string(),
            ));
        }
        for path in &work.missing {
            warn!("Input not found: {}", path.display());
        }
        if self.config.break_on_fail {
            if let Some(path) = work.missing.first() {
                return Err(TransferError::NotFound(path.display().to_string()));
            }
        }

        let staging = StagingArea::create(&self.config.staging_root)?;
        let mut manifest = match self.fetch_manifest(&staging).await? {
            Some(existing) => {
                work.reuse_remote_names(&existing)
                    .map_err(|e| TransferError::Configuration(e.to_string()))?;
                existing
            }
            None => Manifest::new(),
        };

        let mut pipeline = ProtectPipeline::new(
            self.config.pipeline_config(),
            self.config.toggles(),
            self.checksum_key.clone(),
        )
        .with_key_dir(staging.keys_dir());
        if let Some(keys) = keys {
            pipeline = pipeline.with_recipient(keys.recipient_public, keys.passphrase);
        }
        let worker = UploadWorker::new(
            Arc::new(pipeline),
            Arc::clone(&self.transport),
            staging.clone(),
            self.config.overwrite,
        );

        info!(
            "Uploading {} files ({} bytes) via {}",
            work.units.len(),
            work.total_size(),
            self.transport.name()
        );
        let summary = self.scheduler(worker)?.run(std::mem::take(&mut work.units)).await?;

        if summary.succeeded() > 0 {
            for (name, record) in summary.records() {
                manifest.insert(name, record.clone());
            }
            manifest.created_at = Utc::now();
            let path = staging.meta_dir().join(Manifest::REMOTE_KEY);
            manifest.save(&path).map_err(manifest_error)?;
            self.transport.upload(&path, Manifest::REMOTE_KEY).await?;
            info!("Published manifest with {} entries", manifest.len());
        }

        self.finish(summary, manifest, work.missing, staging)
    }

    /// Download and restore `names` (every manifest entry when empty) into
    /// `destination`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no manifest or a name is not in it
    /// - `Configuration` if encrypted entries are selected without a key
    pub async fn download(
        &self,
        destination: &Path,
        names: &[String],
        recipient: Option<Arc<RecipientKey>>,
    ) -> Result<DeliveryReport> {
        let staging = StagingArea::create(&self.config.staging_root)?;
        let manifest = self
            .fetch_manifest(&staging)
            .await?
            .ok_or_else(|| TransferError::NotFound(Manifest::REMOTE_KEY.to_string()))?;

        let units = DownloadWorker::units(&manifest, destination, names)?;
        let needs_key = units.iter().any(|unit| {
            manifest
                .get(unit.logical_name())
                .is_some_and(|record| record.is_encrypted())
        });

        let mut pipeline = RestorePipeline::new(
            self.config.pipeline_config(),
            self.checksum_key.clone(),
            self.config.verify,
        );
        match recipient {
            Some(key) => pipeline = pipeline.with_recipient(key),
            None if needs_key => {
                return Err(TransferError::Configuration(
                    "encrypted files selected but no recipient private key given".to_string(),
                ));
            }
            None => {}
        }

        let manifest = Arc::new(manifest);
        let worker = DownloadWorker::new(
            Arc::new(pipeline),
            Arc::clone(&self.transport),
            staging.clone(),
            Arc::clone(&manifest),
            self.config.overwrite,
        );

        info!(
            "Downloading {} files into {}",
            units.len(),
            destination.display()
        );
        let summary = self.scheduler(worker)?.run(units).await?;
        let manifest = Arc::unwrap_or_clone(manifest);
        self.finish(summary, manifest, Vec::new(), staging)
    }

    fn scheduler<W: crate::worker::UnitWorker>(&self, worker: W) -> Result<TransferScheduler<W>> {
        Ok(TransferScheduler::new(worker, self.scheduler_options())?
            .with_cancel(self.cancel.clone())
            .with_progress(Arc::clone(&self.progress)))
    }

    async fn fetch_manifest(&self, staging: &StagingArea) -> Result<Option<Manifest>> {
        let local = staging.meta_dir().join("remote-manifest.json");
        match self.transport.download(Manifest::REMOTE_KEY, &local).await {
            Ok(()) => Ok(Some(Manifest::load(&local).map_err(manifest_error)?)),
            Err(TransportError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn finish(
        &self,
        summary: RunSummary,
        manifest: Manifest,
        missing: Vec<PathBuf>,
        staging: StagingArea,
    ) -> Result<DeliveryReport> {
        let mut failures: Vec<FailureRecord> = missing
            .iter()
            .map(|path| {
                FailureRecord::new(
                    path.display().to_string(),
                    &TransferError::NotFound(path.display().to_string()),
                )
            })
            .collect();
        failures.extend(
            summary
                .failures()
                .map(|(name, error)| FailureRecord::new(name, error)),
        );

        let failures_file = if failures.is_empty() {
            None
        } else {
            let path = staging.write_failures(&failures)?;
            warn!("{} files failed, see {}", failures.len(), path.display());
            Some(path)
        };
        staging.prune();

        Ok(DeliveryReport {
            summary,
            manifest,
            missing,
            staging,
            failures_file,
        })
    }
}

fn manifest_error(err: ManifestError) -> TransferError {
    match err {
        ManifestError::Io(e) => TransferError::Io(e),
        ManifestError::Format(e) => TransferError::Configuration(format!("malformed manifest: {e}")),
    }
}
