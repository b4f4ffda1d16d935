// ═══════════════════════════════════════════════════════════════
// RUN METRICS - The tote board for one run of the engine
// ═══════════════════════════════════════════════════════════════
//
// Per-run counters plus a log of every probe attempt. At the end of a run
// the whole thing is dumped as one structured log line, so "why did it pick
// /v1/stages?" can be answered from the job output alone.
//
// Atomic counters for everything, even though a run is single-threaded.
// The collector is shared by `&` across the prober, extractor and writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

/// What happened to one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Accepted,
    Failed(String),
}

/// One issued request: which menu, which path, which params, how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub menu: String,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub outcome: AttemptOutcome,
}

/// Point-in-time copy of the run counters, logged as JSON in the
/// "Run complete" line.
#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub attempt_failures: u64,
    pub races_extracted: u64,
    pub meetings_fetched: u64,
    pub snapshots_written: u64,
    pub snapshots_unchanged: u64,
    pub elapsed_ms: u64,
}

pub struct RunMetrics {
    attempts: AtomicU64,
    attempt_failures: AtomicU64,
    races_extracted: AtomicU64,
    meetings_fetched: AtomicU64,
    snapshots_written: AtomicU64,
    snapshots_unchanged: AtomicU64,
    attempt_log: Mutex<Vec<AttemptRecord>>,
    start_time: Instant,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            attempt_failures: AtomicU64::new(0),
            races_extracted: AtomicU64::new(0),
            meetings_fetched: AtomicU64::new(0),
            snapshots_written: AtomicU64::new(0),
            snapshots_unchanged: AtomicU64::new(0),
            attempt_log: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_attempt(&self, record: AttemptRecord) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if matches!(record.outcome, AttemptOutcome::Failed(_)) {
            self.attempt_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.attempt_log.lock().push(record);
    }

    pub fn add_races(&self, count: usize) {
        self.races_extracted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn increment_meetings(&self) {
        self.meetings_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, changed: bool) {
        if changed {
            self.snapshots_written.fetch_add(1, Ordering::Relaxed);
        } else {
            self.snapshots_unchanged.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Every attempt issued so far, in issue order.
    pub fn attempt_log(&self) -> Vec<AttemptRecord> {
        self.attempt_log.lock().clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            attempt_failures: self.attempt_failures.load(Ordering::Relaxed),
            races_extracted: self.races_extracted.load(Ordering::Relaxed),
            meetings_fetched: self.meetings_fetched.load(Ordering::Relaxed),
            snapshots_written: self.snapshots_written.load(Ordering::Relaxed),
            snapshots_unchanged: self.snapshots_unchanged.load(Ordering::Relaxed),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }

    /// One structured line with the whole run in it, plus the attempt log
    /// at debug.
    pub fn log_summary(&self) {
        for (i, record) in self.attempt_log().iter().enumerate() {
            let outcome = match &record.outcome {
                AttemptOutcome::Accepted => "accepted",
                AttemptOutcome::Failed(reason) => reason.as_str(),
            };
            debug!(
                n = i + 1,
                menu = record.menu.as_str(),
                path = record.path.as_str(),
                params = ?record.params,
                outcome = outcome,
                "Attempt"
            );
        }

        let snap = self.snapshot();
        let json = serde_json::to_string(&snap).unwrap_or_else(|_| "{}".to_string());
        info!(
            attempts = snap.attempts,
            attempt_failures = snap.attempt_failures,
            races = snap.races_extracted,
            meetings = snap.meetings_fetched,
            written = snap.snapshots_written,
            unchanged = snap.snapshots_unchanged,
            metrics = json.as_str(),
            "Run complete"
        );
    }
}
