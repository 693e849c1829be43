//! Purpose: Track reader counters and deliver throttled progress snapshots.
//! Exports: `ReaderMetrics`, `ProgressSnapshot`, `ProgressSink`, `ProgressThrottle`.
//! Role: Mutated only by the decoders; read by progress callbacks and callers.
//! Invariants: Counters are monotonic for the lifetime of one stream.
//! Invariants: Progress fires when either the unit interval or the wall-clock interval elapses.
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::core::options::{DEFAULT_PROGRESS_INTERVAL, DEFAULT_PROGRESS_UNITS};

#[derive(Clone, Debug, Default)]
pub struct ReaderMetrics {
    pub lines_read: u64,
    pub raw_units_parsed: u64,
    pub units_emitted: u64,
    pub errors: u64,
    pub bytes_read: u64,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl ReaderMetrics {
    pub(crate) fn mark_started(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.started_at = Some(OffsetDateTime::now_utc());
        }
    }

    pub(crate) fn mark_completed(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(Instant::now());
            self.completed_at = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn is_completed(&self) -> bool {
        self.finished.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn snapshot(&self, total_bytes: Option<u64>) -> ProgressSnapshot {
        let percent_complete = total_bytes.filter(|total| *total > 0).map(|total| {
            let ratio = self.bytes_read as f64 / total as f64;
            (ratio * 100.0).min(100.0)
        });
        ProgressSnapshot {
            lines_read: self.lines_read,
            units_read: self.raw_units_parsed,
            units_emitted: self.units_emitted,
            errors: self.errors,
            bytes_read: self.bytes_read,
            percent_complete,
            elapsed: self.elapsed(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    pub lines_read: u64,
    pub units_read: u64,
    pub units_emitted: u64,
    pub errors: u64,
    pub bytes_read: u64,
    pub percent_complete: Option<f64>,
    pub elapsed: Duration,
}

pub trait ProgressSink: Send {
    fn progress(&mut self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressSnapshot) + Send,
{
    fn progress(&mut self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

pub struct ProgressThrottle {
    sink: Box<dyn ProgressSink>,
    every_units: u64,
    every: Duration,
    last_units: u64,
    last_at: Instant,
}

impl ProgressThrottle {
    pub fn new(sink: Box<dyn ProgressSink>) -> Self {
        Self {
            sink,
            every_units: DEFAULT_PROGRESS_UNITS,
            every: DEFAULT_PROGRESS_INTERVAL,
            last_units: 0,
            last_at: Instant::now(),
        }
    }

    pub fn with_intervals(mut self, every_units: u64, every: Duration) -> Self {
        self.every_units = every_units.max(1);
        self.every = every;
        self
    }

    pub fn observe(&mut self, metrics: &ReaderMetrics, total_bytes: Option<u64>) {
        let units = metrics.raw_units_parsed;
        let due_by_units = units.saturating_sub(self.last_units) >= self.every_units;
        let due_by_time = self.last_at.elapsed() >= self.every;
        if due_by_units || due_by_time {
            self.emit(metrics, total_bytes);
        }
    }

    pub fn finish(&mut self, metrics: &ReaderMetrics, total_bytes: Option<u64>) {
        self.emit(metrics, total_bytes);
    }

    fn emit(&mut self, metrics: &ReaderMetrics, total_bytes: Option<u64>) {
        self.last_units = metrics.raw_units_parsed;
        self.last_at = Instant::now();
        self.sink.progress(&metrics.snapshot(total_bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::{ProgressSnapshot, ProgressThrottle, ReaderMetrics};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn snapshot_reports_percent_when_size_known() {
        let metrics = ReaderMetrics {
            bytes_read: 25,
            ..ReaderMetrics::default()
        };
        assert_eq!(metrics.snapshot(Some(100)).percent_complete, Some(25.0));
        assert_eq!(metrics.snapshot(None).percent_complete, None);
        assert_eq!(metrics.snapshot(Some(0)).percent_complete, None);
    }

    #[test]
    fn throttle_fires_on_unit_interval() {
        let seen: Arc<Mutex<Vec<ProgressSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut throttle = ProgressThrottle::new(Box::new(move |snap: &ProgressSnapshot| {
            sink_seen.lock().unwrap().push(snap.clone());
        }))
        .with_intervals(3, Duration::from_secs(3600));

        let mut metrics = ReaderMetrics::default();
        for _ in 0..7 {
            metrics.raw_units_parsed += 1;
            throttle.observe(&metrics, None);
        }
        let units: Vec<u64> = seen.lock().unwrap().iter().map(|s| s.units_read).collect();
        assert_eq!(units, vec![3, 6]);
    }

    #[test]
    fn elapsed_freezes_after_completion() {
        let mut metrics = ReaderMetrics::default();
        metrics.mark_started();
        metrics.mark_completed();
        let first = metrics.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(metrics.elapsed(), first);
        assert!(metrics.completed_at.is_some());
    }
}
