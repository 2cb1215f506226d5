//! Real-time media pipeline engine.
//!
//! Filters run on their own worker tasks and exchange preallocated frames through
//! bounded single-producer/single-consumer queues. A MASTER filter paces itself on a
//! frame period; a SLAVE filter reacts to input.

pub mod clock;
pub mod filters;
pub mod frames;
pub mod pipeline;
pub mod queue;
pub mod stop;
pub mod task_manager;

pub use clock::{BaseClock, SystemClock};
pub use filters::{
    Filter, FilterError, FilterHandle, FilterParams, FilterRole, FilterSnapshot, FilterState,
    ReaderId, WriterId,
};
pub use frames::*;
pub use pipeline::{Pipeline, PipelineError, PipelineSink, PipelineSource};
pub use queue::{BufferQueueFactory, FrameQueue, OverflowPolicy, QueueError, QueueFactory, QueueParams};
pub use stop::StopSignal;
pub use task_manager::{TaskManager, TaskManagerConfig};
