//! # FERRY Core
//!
//! Delivery orchestration for the FERRY client.
//!
//! This crate provides:
//! - [`TransferScheduler`]: bounded, credit-based admission of per-file work
//! - [`UploadWorker`] / [`DownloadWorker`]: protect + upload, download + restore
//! - [`Transport`]: the object-store seam, with a directory-backed implementation
//! - [`Delivery`]: a whole upload or download run, including the manifest
//!
//! ## Run flow
//!
//! ```text
//! WorkList --> TransferScheduler --(N slots)--> UnitWorker --> Transport
//!                    |                              |
//!                    +-- RunSummary <-- UnitReport -+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod progress;
pub mod scheduler;
pub mod staging;
pub mod transport;
pub mod worker;

pub use cancel::CancelFlag;
pub use config::DeliveryConfig;
pub use delivery::{Delivery, DeliveryReport, UploadKeys};
pub use error::{Result, TransferError};
pub use progress::{NoProgress, ProgressReporter};
pub use scheduler::{RunSummary, SchedulerOptions, TransferScheduler, UnitReport};
pub use staging::StagingArea;
pub use transport::{LocalDirTransport, Transport, TransportError};
pub use worker::{DownloadWorker, UnitWorker, UploadWorker};
