//! Bounded frame queues connecting one producer filter to one consumer filter.
//!
//! A queue owns a fixed set of preallocated frames. Producers borrow a free frame,
//! fill it and commit it; consumers take the oldest committed frame and hand it back
//! when done, so steady-state operation never allocates.

pub mod factory;
pub mod frame_queue;
pub mod params;

pub use factory::{BufferQueueFactory, FrameLayout, QueueFactory};
pub use frame_queue::{FrameQueue, QueueError, QueueStats, ReadGuard, WriteGuard};
pub use params::{OverflowPolicy, QueueParams, DEFAULT_QUEUE_CAPACITY};
