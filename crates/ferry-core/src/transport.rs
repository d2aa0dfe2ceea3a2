//! Object-store transport seam.
//!
//! Workers move staged artifacts through a [`Transport`]; retry and
//! multipart behavior belong to the implementation. [`LocalDirTransport`]
//! stores objects as files below a bucket directory.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Transport errors. Terminal for the file they occur on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No object under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Key cannot be mapped to a storage location
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// I/O failure
    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backend-specific failure
    #[error("{0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Object-store operations used by the workers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Store the file at `local_path` under `remote_key`.
    async fn upload(&self, local_path: &Path, remote_key: &str) -> TransportResult<()>;

    /// Fetch the object under `remote_key` into `local_path`.
    async fn download(&self, remote_key: &str, local_path: &Path) -> TransportResult<()>;

    /// Whether an object exists under `remote_key`.
    ///
    /// Backends that cannot tell report `false`, which disables the
    /// overwrite check.
    async fn exists(&self, remote_key: &str) -> TransportResult<bool> {
        let _ = remote_key;
        Ok(false)
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Directory-backed object store.
#[derive(Debug, Clone)]
pub struct LocalDirTransport {
    root: PathBuf,
}

impl LocalDirTransport {
    /// Open (creating if needed) a bucket directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> TransportResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Bucket directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object key to a path below the bucket.
    ///
    /// Keys are `/`-separated relative paths; empty, absolute and `..`
    /// components are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for keys that would escape the bucket.
    pub fn object_path(&self, remote_key: &str) -> TransportResult<PathBuf> {
        if remote_key.is_empty() || remote_key.contains('\\') {
            return Err(TransportError::InvalidKey(remote_key.to_string()));
        }
        let relative = Path::new(remote_key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(TransportError::InvalidKey(remote_key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Transport for LocalDirTransport {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> TransportResult<()> {
        let target = self.object_path(remote_key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = target.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = tokio::fs::copy(local_path, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &target).await?;
        debug!("Stored {} at {}", remote_key, target.display());
        Ok(())
    }

    async fn download(&self, remote_key: &str, local_path: &Path) -> TransportResult<()> {
        let source = self.object_path(remote_key)?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&source, local_path).await {
            Ok(bytes) => {
                debug!("Fetched {} ({} bytes)", remote_key, bytes);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TransportError::NotFound(remote_key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, remote_key: &str) -> TransportResult<bool> {
        let path = self.object_path(remote_key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    fn name(&self) -> &'static str {
        "local-dir"
    }
}
