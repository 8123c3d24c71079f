//! Execution status of an update source.
//!
//! `PollerStatus` records the outcome of every tick so that operators can
//! observe lag and failures without the poller ever raising them to writers.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TickResult {
    /// Tick committed
    Success,
    /// Tick rolled back with an error message
    Failed(String),
    /// Tick did not run (paused, database unavailable)
    Skipped(String),
}

/// Counters and last-run information of one update source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollerSnapshot {
    /// When the last tick started
    pub last_run: Option<DateTime<Utc>>,
    /// Duration of the last tick in milliseconds
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<TickResult>,
    /// Ticks that ran, successful or not
    pub tick_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
    /// Change events delivered by committed ticks
    pub events_delivered: u64,
    /// Log rows deleted by committed ticks
    pub rows_deleted: u64,
    /// Whether a tick is executing
    pub is_running: bool,
}

/// Thread-safe tick bookkeeping.
#[derive(Debug, Default)]
pub struct PollerStatus {
    inner: RwLock<PollerSnapshot>,
}

impl PollerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut PollerSnapshot)) {
        let mut snapshot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut snapshot);
    }

    /// Record that a tick has started.
    pub fn record_start(&self) {
        self.update(|s| {
            s.is_running = true;
            s.last_run = Some(Utc::now());
        });
    }

    /// Record a committed tick.
    pub fn record_success(&self, events: u64, rows: u64, duration_ms: u64) {
        self.update(|s| {
            s.is_running = false;
            s.tick_count += 1;
            s.events_delivered += events;
            s.rows_deleted += rows;
            s.last_duration_ms = Some(duration_ms);
            s.last_result = Some(TickResult::Success);
        });
    }

    /// Record a rolled back tick.
    pub fn record_failure(&self, message: impl Into<String>, duration_ms: u64) {
        self.update(|s| {
            s.is_running = false;
            s.tick_count += 1;
            s.error_count += 1;
            s.last_duration_ms = Some(duration_ms);
            s.last_result = Some(TickResult::Failed(message.into()));
        });
    }

    pub fn record_skip(&self, reason: impl Into<String>) {
        self.update(|s| {
            s.skipped_count += 1;
            s.last_result = Some(TickResult::Skipped(reason.into()));
        });
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lifecycle() {
        let status = PollerStatus::new();
        status.record_start();
        assert!(status.snapshot().is_running);
        assert!(status.snapshot().last_run.is_some());

        status.record_success(10, 4, 12);
        let snap = status.snapshot();
        assert!(!snap.is_running);
        assert_eq!(snap.tick_count, 1);
        assert_eq!(snap.events_delivered, 10);
        assert_eq!(snap.rows_deleted, 4);
        assert_eq!(snap.last_duration_ms, Some(12));
        assert_eq!(snap.last_result, Some(TickResult::Success));
    }

    #[test]
    fn test_failure_and_skip() {
        let status = PollerStatus::new();
        status.record_start();
        status.record_failure("db down", 3);
        status.record_skip("paused");
        let snap = status.snapshot();
        assert_eq!(snap.tick_count, 1);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.skipped_count, 1);
        assert_eq!(snap.events_delivered, 0);
        assert_eq!(snap.last_result, Some(TickResult::Skipped("paused".into())));
    }

    #[test]
    fn test_tick_result_serialization() {
        let json = serde_json::to_string(&TickResult::Failed("boom".into())).unwrap();
        let back: TickResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TickResult::Failed("boom".into()));
    }
}
