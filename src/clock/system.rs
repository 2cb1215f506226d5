//! System clock implementation backed by tokio's monotonic instant.

use tokio::time::Instant;

use crate::clock::{BaseClock, ClockError, ClockResult};

/// Monotonic clock measuring nanoseconds from when it was started.
///
/// Uses `tokio::time::Instant`, which follows the paused/advanced test clock.
#[derive(Debug, Default)]
pub struct SystemClock {
    start_time: Option<Instant>,
}

impl SystemClock {
    /// Create a new system clock in the stopped state.
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Create and start a new system clock.
    pub fn new_started() -> Self {
        Self {
            start_time: Some(Instant::now()),
        }
    }
}

impl BaseClock for SystemClock {
    fn get_time(&self) -> ClockResult<u64> {
        let start_time = self.start_time.ok_or(ClockError::NotRunning)?;
        Ok(start_time.elapsed().as_nanos() as u64)
    }

    fn start(&mut self) -> ClockResult<()> {
        self.start_time = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> ClockResult<()> {
        self.start_time = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    fn resolution(&self) -> u64 {
        1
    }
}
