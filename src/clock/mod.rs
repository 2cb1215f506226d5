//! Clocks used by filters to time processing cycles and pace MASTER filters.
//!
//! The default [`SystemClock`] reads tokio's monotonic clock, so tests that pause
//! tokio time get fully deterministic pacing.

pub mod base;
pub mod system;

pub use base::{BaseClock, ClockError, ClockResult};
pub use system::SystemClock;
