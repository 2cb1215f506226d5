//! Filter nodes and their transformation capabilities.

pub mod base;
pub mod cycle;
pub mod handle;
pub mod one_to_many;
pub mod one_to_one;
pub mod params;
pub mod shared;
pub mod state;

#[cfg(test)]
pub(crate) mod mockup;

/// Reader slot id, unique within one filter.
pub type ReaderId = u32;
/// Writer slot id, unique within one filter.
pub type WriterId = u32;

pub use base::{Filter, FilterError, FrameTransform};
pub use cycle::{InputFrames, OutputFrames};
pub use handle::FilterHandle;
pub use one_to_many::{Broadcast, FanOutProcess};
pub use one_to_one::{OneToOneProcess, Passthrough};
pub use params::{FilterParams, FilterRole, DEFAULT_FRAME_TIME};
pub use shared::SharedFramePool;
pub use state::{FilterSnapshot, FilterState, FilterStats, FilterStatus};
