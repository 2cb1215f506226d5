//! Filter lifecycle state and counters shared between a running filter and the
//! handles used to observe or stop it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::filters::params::{FilterParams, FilterRole};
use crate::filters::{ReaderId, WriterId};
use crate::queue::{FrameQueue, QueueStats};
use crate::stop::StopSignal;

/// Filter lifecycle: `Created → Running → Stopping → Stopped`. Stop is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl FilterState {
    fn as_u8(self) -> u8 {
        match self {
            FilterState::Created => 0,
            FilterState::Running => 1,
            FilterState::Stopping => 2,
            FilterState::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => FilterState::Created,
            1 => FilterState::Running,
            2 => FilterState::Stopping,
            _ => FilterState::Stopped,
        }
    }
}

/// Cycle counters of one filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Every completed cycle, including idle ones.
    pub cycles: u64,
    /// Cycles that found no input.
    pub idle_cycles: u64,
    pub frames_consumed: u64,
    pub frames_published: u64,
    /// MASTER cycles that took longer than the frame time.
    pub overruns: u64,
    pub last_cycle_us: u64,
}

/// Lifecycle state, stop flag and counters of a filter, shared through an `Arc`.
///
/// [`FilterStatus::stop`] may be called from any thread, any number of times.
#[derive(Debug)]
pub struct FilterStatus {
    name: String,
    state: AtomicU8,
    stop: StopSignal,
    cycles: AtomicU64,
    idle_cycles: AtomicU64,
    frames_consumed: AtomicU64,
    frames_published: AtomicU64,
    overruns: AtomicU64,
    last_cycle_ns: AtomicU64,
}

impl FilterStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(FilterState::Created.as_u8()),
            stop: StopSignal::new(),
            cycles: AtomicU64::new(0),
            idle_cycles: AtomicU64::new(0),
            frames_consumed: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            last_cycle_ns: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FilterState {
        FilterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: FilterState, to: FilterState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Request termination at the next safe point and wake every waiting operation.
    ///
    /// A filter that never ran goes straight to `Stopped`; a running one goes to
    /// `Stopping` and its loop completes the transition. Returns `true` only for the
    /// call that changed the state.
    pub fn stop(&self) -> bool {
        let changed = self.transition(FilterState::Created, FilterState::Stopped)
            || self.transition(FilterState::Running, FilterState::Stopping);
        self.stop.stop();
        if changed {
            debug!("Filter '{}': stop requested", self.name);
        }
        changed
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub(crate) fn begin_running(&self) -> bool {
        !self.is_stop_requested() && self.transition(FilterState::Created, FilterState::Running)
    }

    /// Complete the lifecycle once the loop has exited. Returns `true` exactly once.
    pub(crate) fn finish(&self) -> bool {
        self.transition(FilterState::Stopping, FilterState::Stopped)
            || self.transition(FilterState::Running, FilterState::Stopped)
    }

    pub(crate) fn record_idle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.idle_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self, consumed: usize, published: usize, elapsed_ns: u64) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.frames_consumed
            .fetch_add(consumed as u64, Ordering::Relaxed);
        self.frames_published
            .fetch_add(published as u64, Ordering::Relaxed);
        self.last_cycle_ns.store(elapsed_ns, Ordering::Relaxed);
    }

    pub(crate) fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            idle_cycles: self.idle_cycles.load(Ordering::Relaxed),
            frames_consumed: self.frames_consumed.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            last_cycle_us: self.last_cycle_ns.load(Ordering::Relaxed) / 1_000,
        }
    }
}

/// Structured snapshot of a filter for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FilterSnapshot {
    pub name: String,
    pub role: FilterRole,
    pub state: FilterState,
    pub frame_time_us: u64,
    pub shared_frames: bool,
    pub stats: FilterStats,
    pub readers: BTreeMap<ReaderId, QueueStats>,
    pub writers: BTreeMap<WriterId, QueueStats>,
    /// Transformation-specific fields filled by the `get_state` hook.
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl FilterSnapshot {
    pub(crate) fn collect(
        params: &FilterParams,
        status: &FilterStatus,
        readers: &BTreeMap<ReaderId, Arc<FrameQueue>>,
        writers: &BTreeMap<WriterId, Arc<FrameQueue>>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            name: status.name().to_string(),
            role: params.role,
            state: status.state(),
            frame_time_us: params.frame_time.as_micros() as u64,
            shared_frames: params.shared_frames,
            stats: status.stats(),
            readers: readers.iter().map(|(id, q)| (*id, q.stats())).collect(),
            writers: writers.iter().map(|(id, q)| (*id, q.stats())).collect(),
            details,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_before_start_is_terminal() {
        let status = FilterStatus::new("f");
        assert_eq!(status.state(), FilterState::Created);
        assert!(status.stop());
        assert_eq!(status.state(), FilterState::Stopped);
        assert!(!status.begin_running());
        assert!(!status.stop());
    }

    #[test]
    fn test_running_lifecycle() {
        let status = FilterStatus::new("f");
        assert!(status.begin_running());
        assert!(!status.begin_running());
        assert!(status.stop());
        assert_eq!(status.state(), FilterState::Stopping);
        assert!(status.finish());
        assert!(!status.finish());
        assert_eq!(status.state(), FilterState::Stopped);
    }

    #[test]
    fn test_concurrent_stop_changes_state_once() {
        let status = Arc::new(FilterStatus::new("f"));
        assert!(status.begin_running());

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let status = Arc::clone(&status);
                std::thread::spawn(move || status.stop())
            })
            .collect();
        let changed = callers
            .into_iter()
            .map(|c| c.join().unwrap())
            .filter(|changed| *changed)
            .count();

        assert_eq!(changed, 1);
        assert_eq!(status.state(), FilterState::Stopping);
        assert!(status.is_stop_requested());
    }

    #[test]
    fn test_counters() {
        let status = FilterStatus::new("f");
        status.record_cycle(1, 2, 5_000);
        status.record_idle();
        status.record_overrun();

        let stats = status.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.idle_cycles, 1);
        assert_eq!(stats.frames_consumed, 1);
        assert_eq!(stats.frames_published, 2);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.last_cycle_us, 5);
    }
}
