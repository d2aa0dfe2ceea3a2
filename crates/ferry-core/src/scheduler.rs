//! Bounded concurrent transfer scheduler.
//!
//! A single coordinating task owns admission. It holds `concurrency`
//! credits; each admitted unit takes one and returns it on completion, so
//! at most `concurrency` units are ever in flight and a freed credit is
//! reused as soon as the completion is observed. Completions are collected
//! in the order they finish.
//!
//! ```text
//!  queue: [u0 u1 u2 u3 u4 ...]
//!           |  admit while credits > 0 and not halted/cancelled
//!           v
//!  slots: [ u0 | u1 | u2 | u3 ]  --join_next-->  reports (completion order)
//! ```
//!
//! Slot bookkeeping and per-unit reports are scheduler-owned state behind a
//! mutex; a [`SlotLease`] moved into each task releases its slot on drop,
//! including when the task panics.

use crate::cancel::CancelFlag;
use crate::config::MAX_CONCURRENCY;
use crate::error::{Result, TransferError};
use crate::progress::{NoProgress, ProgressReporter};
use crate::worker::UnitWorker;
use ferry_files::{FileUnit, TransferRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Admission options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Maximum units in flight (1-32)
    pub concurrency: usize,
    /// Stop admitting after the first failure
    pub break_on_fail: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            break_on_fail: false,
        }
    }
}

/// Outcome of one admitted unit.
#[derive(Debug)]
pub struct UnitReport {
    /// Position of the unit in the input sequence
    pub index: usize,
    /// Logical name of the unit
    pub logical_name: String,
    /// Record on success, the per-file error otherwise
    pub result: Result<TransferRecord>,
    /// Time from admission to completion
    pub elapsed: Duration,
}

impl UnitReport {
    /// Whether the unit succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate result of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Admitted units in completion order
    pub reports: Vec<UnitReport>,
    /// Logical names of units never admitted
    pub not_admitted: Vec<String>,
    /// Highest number of units in flight at once
    pub peak_in_flight: usize,
    /// Admission stopped because a unit failed with break-on-fail set
    pub halted: bool,
    /// Cancellation was observed
    pub cancelled: bool,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl RunSummary {
    /// Number of successful units.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failed units.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    /// Whether every unit was admitted and succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.not_admitted.is_empty() && !self.halted && !self.cancelled
    }

    /// Successful records by logical name.
    pub fn records(&self) -> impl Iterator<Item = (&str, &TransferRecord)> {
        self.reports.iter().filter_map(|r| {
            r.result
                .as_ref()
                .ok()
                .map(|record| (r.logical_name.as_str(), record))
        })
    }

    /// Failures by logical name.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &TransferError)> {
        self.reports.iter().filter_map(|r| {
            r.result
                .as_ref()
                .err()
                .map(|e| (r.logical_name.as_str(), e))
        })
    }
}

/// One concurrency credit and the unit occupying it.
#[derive(Debug, Clone, Default)]
pub struct WorkerSlot {
    /// Logical name of the unit in the slot, if busy
    pub unit: Option<String>,
    /// Units completed by this slot
    pub completed: usize,
}

#[derive(Debug, Default)]
struct SchedulerState {
    slots: Vec<WorkerSlot>,
    in_flight: usize,
    peak_in_flight: usize,
    reports: Vec<UnitReport>,
}

impl SchedulerState {
    fn with_slots(n: usize) -> Self {
        Self {
            slots: vec![WorkerSlot::default(); n],
            ..Self::default()
        }
    }

    fn acquire(&mut self, logical_name: &str) -> Option<usize> {
        let slot = self.slots.iter().position(|s| s.unit.is_none())?;
        self.slots[slot].unit = Some(logical_name.to_string());
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        Some(slot)
    }

    fn release(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.unit = None;
            s.completed += 1;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

/// Holds a slot for one task. Records the report and frees the slot.
struct SlotLease {
    state: Arc<Mutex<SchedulerState>>,
    slot: usize,
    index: usize,
    logical_name: String,
    admitted: Instant,
    reported: bool,
}

impl SlotLease {
    fn complete(mut self, result: Result<TransferRecord>) -> bool {
        let ok = result.is_ok();
        self.push(result);
        ok
    }

    fn push(&mut self, result: Result<TransferRecord>) {
        self.reported = true;
        let report = UnitReport {
            index: self.index,
            logical_name: self.logical_name.clone(),
            result,
            elapsed: self.admitted.elapsed(),
        };
        self.state.lock().reports.push(report);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if !self.reported {
            self.push(Err(TransferError::TaskJoin(
                "worker task ended without a result".to_string(),
            )));
        }
        self.state.lock().release(self.slot);
    }
}

/// Runs a [`UnitWorker`] over a sequence of units with bounded concurrency.
pub struct TransferScheduler<W: UnitWorker> {
    worker: Arc<W>,
    options: SchedulerOptions,
    cancel: CancelFlag,
    progress: Arc<dyn ProgressReporter>,
    state: Arc<Mutex<SchedulerState>>,
}

impl<W: UnitWorker> TransferScheduler<W> {
    /// Create a scheduler.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `concurrency` is outside 1..=32.
    pub fn new(worker: W, options: SchedulerOptions) -> Result<Self> {
        if !(1..=MAX_CONCURRENCY).contains(&options.concurrency) {
            return Err(TransferError::Configuration(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                options.concurrency
            )));
        }
        Ok(Self {
            worker: Arc::new(worker),
            options,
            cancel: CancelFlag::new(),
            progress: Arc::new(NoProgress),
            state: Arc::new(Mutex::new(SchedulerState::with_slots(options.concurrency))),
        })
    }

    /// Use an externally controlled cancellation flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancellation flag shared with every worker.
    #[must_use]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Units currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Snapshot of the slot table.
    #[must_use]
    pub fn slots(&self) -> Vec<WorkerSlot> {
        self.state.lock().slots.clone()
    }

    /// Process `units` and report per-unit outcomes.
    ///
    /// Per-unit failures never abort the call; they are collected in the
    /// summary.
    ///
    /// # Errors
    ///
    /// Returns `TaskJoin` only if the slot table is corrupted.
    pub async fn run(&self, units: Vec<FileUnit>) -> Result<RunSummary> {
        let started = Instant::now();
        let total_bytes = units.iter().map(FileUnit::size).sum();
        self.progress.start(units.len(), total_bytes);
        {
            let mut state = self.state.lock();
            *state = SchedulerState::with_slots(self.options.concurrency);
        }

        let mut queue = units.into_iter().enumerate();
        let mut tasks: JoinSet<bool> = JoinSet::new();
        let mut halted = false;
        let mut cancelled = false;

        loop {
            while !halted && tasks.len() < self.options.concurrency {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let Some((index, unit)) = queue.next() else {
                    break;
                };
                self.admit(&mut tasks, index, unit)?;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let succeeded = joined.unwrap_or_else(|e| {
                error!("Worker task failed: {e}");
                false
            });

            if !succeeded && self.options.break_on_fail && !halted {
                warn!("Unit failed with break-on-fail set, draining in-flight work");
                halted = true;
            }
        }

        if !cancelled && self.cancel.is_cancelled() {
            cancelled = true;
        }
        let not_admitted: Vec<String> = queue
            .map(|(_, unit)| unit.logical_name().to_string())
            .collect();

        let (reports, peak_in_flight) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.reports), state.peak_in_flight)
        };
        self.progress.finish();

        let summary = RunSummary {
            reports,
            not_admitted,
            peak_in_flight,
            halted,
            cancelled,
            elapsed: started.elapsed(),
        };
        info!(
            "Run finished: {} succeeded, {} failed, {} not admitted in {:.2?} (peak {} in flight)",
            summary.succeeded(),
            summary.failed(),
            summary.not_admitted.len(),
            summary.elapsed,
            summary.peak_in_flight
        );
        Ok(summary)
    }

    fn admit(
        &self,
        tasks: &mut JoinSet<bool>,
        index: usize,
        unit: FileUnit,
    ) -> Result<()> {
        let slot = self
            .state
            .lock()
            .acquire(unit.logical_name())
            .ok_or_else(|| TransferError::TaskJoin("no free worker slot".to_string()))?;
        debug!("Admitted {} into slot {}", unit.logical_name(), slot);

        let lease = SlotLease {
            state: Arc::clone(&self.state),
            slot,
            index,
            logical_name: unit.logical_name().to_string(),
            admitted: Instant::now(),
            reported: false,
        };
        let worker = Arc::clone(&self.worker);
        let cancel = self.cancel.clone();
        let progress = Arc::clone(&self.progress);

        tasks.spawn(async move {
            let result = worker.process(&unit, &cancel).await;
            match &result {
                Ok(_) => progress.advance(&unit),
                Err(e) => {
                    error!("{} failed: {e}", unit.logical_name());
                    progress.failed(&unit, e);
                }
            }
            lease.complete(result)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferry_files::record::TransferRecordBuilder;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    fn units(names: &[&str]) -> Vec<FileUnit> {
        names
            .iter()
            .map(|n| FileUnit::new(PathBuf::from(format!("/src/{n}")), *n, format!("abc123_{n}"), 1, false))
            .collect()
    }

    fn record_for(unit: &FileUnit) -> TransferRecord {
        let mut builder = TransferRecordBuilder::new(unit.remote_name());
        builder.original("00".repeat(32), unit.size());
        builder.finish(unit.local_path().to_path_buf(), unit.size()).unwrap()
    }

    /// Fails units whose name starts with "bad", tracks concurrency.
    #[derive(Default)]
    struct ScriptedWorker {
        active: AtomicUsize,
        max_active: AtomicUsize,
        seen: parking_lot::Mutex<Vec<String>>,
        delay_ms: u64,
    }

    #[async_trait]
    impl UnitWorker for ScriptedWorker {
        async fn process(&self, unit: &FileUnit, _cancel: &CancelFlag) -> Result<TransferRecord> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().push(unit.logical_name().to_string());
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if unit.logical_name().starts_with("bad") {
                Err(TransferError::AuthenticationTag("scripted".into()))
            } else {
                Ok(record_for(unit))
            }
        }
    }

    #[tokio::test]
    async fn test_all_units_processed_once() {
        let worker = ScriptedWorker {
            delay_ms: 5,
            ..ScriptedWorker::default()
        };
        let scheduler = TransferScheduler::new(
            worker,
            SchedulerOptions {
                concurrency: 3,
                break_on_fail: false,
            },
        )
        .unwrap();

        let names: Vec<String> = (0..10).map(|i| format!("f{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let summary = scheduler.run(units(&refs)).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.succeeded(), 10);
        assert!(summary.peak_in_flight <= 3);
        let indices: HashSet<usize> = summary.reports.iter().map(|r| r.index).collect();
        assert_eq!(indices.len(), 10);
        assert_eq!(scheduler.in_flight(), 0);
        assert!(scheduler.slots().iter().all(|s| s.unit.is_none()));
    }

    #[tokio::test]
    async fn test_failure_without_break_continues() {
        let scheduler = TransferScheduler::new(
            ScriptedWorker::default(),
            SchedulerOptions {
                concurrency: 1,
                break_on_fail: false,
            },
        )
        .unwrap();
        let summary = scheduler.run(units(&["a", "bad_b", "c"])).await.unwrap();

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(summary.not_admitted.is_empty());
        assert!(!summary.halted);
        let failures: Vec<&str> = summary.failures().map(|(n, _)| n).collect();
        assert_eq!(failures, vec!["bad_b"]);
    }

    #[tokio::test]
    async fn test_break_on_fail_stops_admission() {
        let scheduler = TransferScheduler::new(
            ScriptedWorker::default(),
            SchedulerOptions {
                concurrency: 1,
                break_on_fail: true,
            },
        )
        .unwrap();
        let summary = scheduler.run(units(&["a", "bad_b", "c"])).await.unwrap();

        assert!(summary.halted);
        assert!(!summary.is_success());
        assert_eq!(summary.not_admitted, vec!["c".to_string()]);
        let seen = scheduler.worker.seen.lock().clone();
        assert_eq!(seen, vec!["a".to_string(), "bad_b".to_string()]);
    }

    /// Cancels the shared flag while processing the first unit.
    struct CancellingWorker {
        cancel: CancelFlag,
    }

    #[async_trait]
    impl UnitWorker for CancellingWorker {
        async fn process(&self, unit: &FileUnit, cancel: &CancelFlag) -> Result<TransferRecord> {
            self.cancel.cancel();
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            Ok(record_for(unit))
        }
    }

    #[tokio::test]
    async fn test_no_admission_after_cancel() {
        let cancel = CancelFlag::new();
        let scheduler = TransferScheduler::new(
            CancellingWorker {
                cancel: cancel.clone(),
            },
            SchedulerOptions {
                concurrency: 1,
                break_on_fail: false,
            },
        )
        .unwrap()
        .with_cancel(cancel);

        let summary = scheduler.run(units(&["a", "b", "c"])).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.reports.len(), 1);
        assert!(matches!(
            summary.reports[0].result,
            Err(TransferError::Cancelled)
        ));
        assert_eq!(summary.not_admitted, vec!["b".to_string(), "c".to_string()]);
    }

    /// Each group of `width` units must be in flight together to pass.
    struct BarrierWorker {
        barrier: Barrier,
        gated: usize,
    }

    #[async_trait]
    impl UnitWorker for BarrierWorker {
        async fn process(&self, unit: &FileUnit, _cancel: &CancelFlag) -> Result<TransferRecord> {
            let index: usize = unit.logical_name()[1..].parse().unwrap_or(usize::MAX);
            if index < self.gated {
                self.barrier.wait().await;
            }
            Ok(record_for(unit))
        }
    }

    #[tokio::test]
    async fn test_exactly_n_in_flight_until_drained() {
        let scheduler = TransferScheduler::new(
            BarrierWorker {
                barrier: Barrier::new(4),
                gated: 8,
            },
            SchedulerOptions {
                concurrency: 4,
                break_on_fail: false,
            },
        )
        .unwrap();

        let names: Vec<String> = (0..9).map(|i| format!("u{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let summary = tokio::time::timeout(Duration::from_secs(10), scheduler.run(units(&refs)))
            .await
            .expect("scheduler starved a slot")
            .unwrap();

        assert_eq!(summary.succeeded(), 9);
        assert_eq!(summary.peak_in_flight, 4);
    }

    struct PanickingWorker;

    #[async_trait]
    impl UnitWorker for PanickingWorker {
        async fn process(&self, unit: &FileUnit, _cancel: &CancelFlag) -> Result<TransferRecord> {
            if unit.logical_name() == "boom" {
                panic!("worker exploded");
            }
            Ok(record_for(unit))
        }
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        let scheduler = TransferScheduler::new(
            PanickingWorker,
            SchedulerOptions {
                concurrency: 1,
                break_on_fail: false,
            },
        )
        .unwrap();
        let summary = scheduler.run(units(&["a", "boom", "c"])).await.unwrap();

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        let failure = summary.failures().next().unwrap();
        assert_eq!(failure.0, "boom");
        assert!(matches!(failure.1, TransferError::TaskJoin(_)));
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_invalid_concurrency() {
        for bad in [0, 33] {
            let result = TransferScheduler::new(
                PanickingWorker,
                SchedulerOptions {
                    concurrency: bad,
                    break_on_fail: false,
                },
            );
            assert!(matches!(result, Err(TransferError::Configuration(_))));
        }
    }

    #[tokio::test]
    async fn test_empty_run() {
        let scheduler =
            TransferScheduler::new(PanickingWorker, SchedulerOptions::default()).unwrap();
        let summary = scheduler.run(Vec::new()).await.unwrap();
        assert!(summary.is_success());
        assert!(summary.reports.is_empty());
        assert_eq!(summary.peak_in_flight, 0);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn prop_never_exceeds_ceiling(n in 1usize..8, m in 0usize..24) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let scheduler = TransferScheduler::new(
                    ScriptedWorker { delay_ms: 1, ..ScriptedWorker::default() },
                    SchedulerOptions { concurrency: n, break_on_fail: false },
                )
                .unwrap();
                let names: Vec<String> = (0..m).map(|i| format!("p{i}")).collect();
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                let summary = scheduler.run(units(&refs)).await.unwrap();

                assert_eq!(summary.reports.len(), m);
                assert!(summary.peak_in_flight <= n);
                assert!(scheduler.worker.max_active.load(Ordering::SeqCst) <= n);
                let indices: HashSet<usize> = summary.reports.iter().map(|r| r.index).collect();
                assert_eq!(indices.len(), m);
            });
        }
    }
}
