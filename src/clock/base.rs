//! Base clock interface for cycle timing.

/// Result type for clock operations
pub type ClockResult<T> = Result<T, ClockError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("clock is not running")]
    NotRunning,
}

/// Abstract base trait for clock implementations.
///
/// A filter reads the clock at the start and end of every cycle; a MASTER filter
/// derives its idle time from the difference.
pub trait BaseClock: Send + Sync + std::fmt::Debug {
    /// Get the current time in nanoseconds since the clock was started.
    ///
    /// # Errors
    /// Returns [`ClockError::NotRunning`] before `start()`.
    fn get_time(&self) -> ClockResult<u64>;

    /// Start or restart the clock.
    fn start(&mut self) -> ClockResult<()>;

    fn stop(&mut self) -> ClockResult<()> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }

    /// The smallest interval this clock can measure, in nanoseconds.
    fn resolution(&self) -> u64 {
        1_000_000
    }
}
