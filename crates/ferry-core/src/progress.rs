//! Progress reporting.

use crate::error::TransferError;
use ferry_files::FileUnit;

/// Observer notified as the scheduler completes units. Purely
/// observational: nothing a reporter does affects the run.
pub trait ProgressReporter: Send + Sync {
    /// A run is about to start.
    fn start(&self, total_units: usize, total_bytes: u64) {
        let _ = (total_units, total_bytes);
    }

    /// A unit completed successfully.
    fn advance(&self, unit: &FileUnit);

    /// A unit failed.
    fn failed(&self, unit: &FileUnit, error: &TransferError) {
        let _ = (unit, error);
    }

    /// The run finished.
    fn finish(&self) {}
}

/// Reporter that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn advance(&self, _unit: &FileUnit) {}
}
