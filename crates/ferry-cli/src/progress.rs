//! Terminal progress display.

use ferry_core::{ProgressReporter, TransferError};
use ferry_files::FileUnit;
use indicatif::{ProgressBar, ProgressStyle};

/// Byte-weighted progress bar over a whole run.
pub struct TransferProgress {
    bar: ProgressBar,
    label: &'static str,
}

impl TransferProgress {
    /// Create a hidden bar; it is sized when the run starts.
    pub fn new(label: &'static str) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            label,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl ProgressReporter for TransferProgress {
    fn start(&self, total_units: usize, total_bytes: u64) {
        self.bar.set_length(total_bytes);
        self.bar.set_style(Self::style());
        self.bar.set_prefix(format!("{} {} files", self.label, total_units));
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn advance(&self, unit: &FileUnit) {
        self.bar.inc(unit.size());
        self.bar.set_message(unit.logical_name().to_string());
    }

    fn failed(&self, unit: &FileUnit, error: &TransferError) {
        self.bar.inc(unit.size());
        self.bar
            .println(format!("FAILED {}: {}", unit.logical_name(), error));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Format a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
