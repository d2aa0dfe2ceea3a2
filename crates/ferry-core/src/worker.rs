//! Per-unit workers driven by the scheduler.

use crate::cancel::CancelFlag;
use crate::error::{Result, TransferError};
use crate::staging::StagingArea;
use crate::transport::Transport;
use async_trait::async_trait;
use ferry_files::{
    FileUnit, Manifest, ProtectPipeline, RestorePipeline, TransferRecord, TransferStatus,
};
use ferry_files::walk::safe_relative;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Work performed for one unit.
///
/// Implementations run CPU-bound pipeline stages on the blocking pool and
/// must poll `cancel` at chunk granularity.
#[async_trait]
pub trait UnitWorker: Send + Sync + 'static {
    /// Process `unit` to completion.
    async fn process(&self, unit: &FileUnit, cancel: &CancelFlag) -> Result<TransferRecord>;
}

/// Protect, upload, then discard the staged artifact.
pub struct UploadWorker {
    pipeline: Arc<ProtectPipeline>,
    transport: Arc<dyn Transport>,
    staging: StagingArea,
    overwrite: bool,
}

impl UploadWorker {
    /// Create an upload worker.
    #[must_use]
    pub fn new(
        pipeline: Arc<ProtectPipeline>,
        transport: Arc<dyn Transport>,
        staging: StagingArea,
        overwrite: bool,
    ) -> Self {
        Self {
            pipeline,
            transport,
            staging,
            overwrite,
        }
    }
}

#[async_trait]
impl UnitWorker for UploadWorker {
    async fn process(&self, unit: &FileUnit, cancel: &CancelFlag) -> Result<TransferRecord> {
        let remote = unit.remote_name();
        if !self.overwrite && self.transport.exists(remote).await? {
            return Err(TransferError::AlreadyExists(remote.to_string()));
        }

        let artifact = self.staging.artifact_path(remote)?;
        let record = {
            let pipeline = Arc::clone(&self.pipeline);
            let unit = unit.clone();
            let artifact = artifact.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                pipeline.protect(&unit, &artifact, cancel.as_atomic())
            })
            .await??
        };

        if cancel.is_cancelled() {
            self.staging.discard(&artifact);
            return Err(TransferError::Cancelled);
        }

        let uploaded = self.transport.upload(&artifact, remote).await;
        self.staging.discard(&artifact);
        uploaded?;

        info!(
            "Uploaded {} as {} via {}",
            unit.logical_name(),
            remote,
            self.transport.name()
        );
        Ok(record.with_status(TransferStatus::Uploaded))
    }
}

/// Download, restore and verify.
pub struct DownloadWorker {
    pipeline: Arc<RestorePipeline>,
    transport: Arc<dyn Transport>,
    staging: StagingArea,
    manifest: Arc<Manifest>,
    overwrite: bool,
}

impl DownloadWorker {
    /// Create a download worker reading records from `manifest`.
    #[must_use]
    pub fn new(
        pipeline: Arc<RestorePipeline>,
        transport: Arc<dyn Transport>,
        staging: StagingArea,
        manifest: Arc<Manifest>,
        overwrite: bool,
    ) -> Self {
        Self {
            pipeline,
            transport,
            staging,
            manifest,
            overwrite,
        }
    }

    /// Units restoring `names` (or every entry when empty) below
    /// `destination`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a requested name is not in the manifest
    /// - `Configuration` if a logical name would escape `destination` or a
    ///   remote name would escape the staging area
    pub fn units(manifest: &Manifest, destination: &Path, names: &[String]) -> Result<Vec<FileUnit>> {
        let selected: Vec<&String> = if names.is_empty() {
            manifest.files.keys().collect()
        } else {
            names.iter().collect()
        };

        selected
            .into_iter()
            .map(|name| {
                let record = manifest
                    .get(name)
                    .ok_or_else(|| TransferError::NotFound(name.clone()))?;
                let relative = safe_relative(name).ok_or_else(|| {
                    TransferError::Configuration(format!("unsafe file name in manifest: {name}"))
                })?;
                if safe_relative(record.remote_name()).is_none() {
                    return Err(TransferError::Configuration(format!(
                        "unsafe object key in manifest: {}",
                        record.remote_name()
                    )));
                }
                Ok(FileUnit::new(
                    destination.join(relative),
                    name.clone(),
                    record.remote_name(),
                    record.size_original(),
                    name.contains('/'),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl UnitWorker for DownloadWorker {
    async fn process(&self, unit: &FileUnit, cancel: &CancelFlag) -> Result<TransferRecord> {
        let record = self
            .manifest
            .get(unit.logical_name())
            .cloned()
            .ok_or_else(|| TransferError::NotFound(unit.logical_name().to_string()))?;
        let destination = unit.local_path().to_path_buf();

        if !self.overwrite && tokio::fs::try_exists(&destination).await? {
            return Err(TransferError::AlreadyExists(
                destination.display().to_string(),
            ));
        }

        let artifact = self.staging.artifact_path(record.remote_name())?;
        if let Err(e) = self
            .transport
            .download(record.remote_name(), &artifact)
            .await
        {
            self.staging.discard(&artifact);
            return Err(e.into());
        }

        let restored = {
            let pipeline = Arc::clone(&self.pipeline);
            let artifact = artifact.clone();
            let destination = destination.clone();
            let record = record.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                pipeline.restore(&artifact, &destination, &record, cancel.as_atomic())
            })
            .await
        };
        self.staging.discard(&artifact);
        let outcome = restored??;

        info!(
            "Downloaded {} to {} ({} bytes{})",
            unit.logical_name(),
            destination.display(),
            outcome.bytes_written,
            if outcome.verified { ", verified" } else { "" }
        );
        Ok(record
            .with_status(TransferStatus::Downloaded)
            .with_final_path(destination))
    }
}
