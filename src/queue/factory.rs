//! Queue factory capability.
//!
//! Each filter is constructed with a factory that decides how its writer queues are
//! sized and what frames fill them. The filter core only relies on the returned queue
//! honouring the [`FrameQueue`] contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::filters::WriterId;
use crate::frames::{Frame, PlanarFrame, RawFrame};
use crate::queue::frame_queue::{FrameQueue, QueueError};
use crate::queue::params::QueueParams;

/// Factory hook used by a filter to allocate the queue behind each writer slot.
pub trait QueueFactory: Send + Sync {
    /// Allocate one frame. Also used to grow the shared-frame pool.
    fn alloc_frame(&self) -> Box<dyn Frame>;

    /// Parameters for the queue behind `writer_id`.
    fn queue_params(&self, _writer_id: WriterId) -> QueueParams {
        QueueParams::default()
    }

    /// Allocate the queue for `writer_id`. Called once per writer slot.
    fn alloc_queue(&self, writer_id: WriterId) -> Result<FrameQueue, QueueError> {
        FrameQueue::new(self.queue_params(writer_id), || self.alloc_frame())
    }
}

/// Memory layout of the frames a [`BufferQueueFactory`] allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameLayout {
    Contiguous { max_length: usize },
    Planar { planes: usize, max_length: usize },
}

impl Default for FrameLayout {
    fn default() -> Self {
        FrameLayout::Contiguous { max_length: 4096 }
    }
}

/// Queue factory backed by plain heap buffers.
///
/// Every writer gets the default [`QueueParams`] unless overridden per writer id,
/// which lets a fan-out filter run one output under `DropOldest` and another under
/// `Block`.
#[derive(Debug, Clone, Default)]
pub struct BufferQueueFactory {
    layout: FrameLayout,
    params: QueueParams,
    overrides: HashMap<WriterId, QueueParams>,
}

impl BufferQueueFactory {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            params: QueueParams::default(),
            overrides: HashMap::new(),
        }
    }

    /// Contiguous frames of `max_length` bytes.
    pub fn contiguous(max_length: usize) -> Self {
        Self::new(FrameLayout::Contiguous { max_length })
    }

    /// Planar frames with `planes` planes of `max_length` bytes each.
    pub fn planar(planes: usize, max_length: usize) -> Self {
        Self::new(FrameLayout::Planar { planes, max_length })
    }

    pub fn with_params(mut self, params: QueueParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_writer_params(mut self, writer_id: WriterId, params: QueueParams) -> Self {
        self.overrides.insert(writer_id, params);
        self
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }
}

impl QueueFactory for BufferQueueFactory {
    fn alloc_frame(&self) -> Box<dyn Frame> {
        match self.layout {
            FrameLayout::Contiguous { max_length } => RawFrame::boxed(max_length),
            FrameLayout::Planar { planes, max_length } => PlanarFrame::boxed(planes, max_length),
        }
    }

    fn queue_params(&self, writer_id: WriterId) -> QueueParams {
        self.overrides
            .get(&writer_id)
            .cloned()
            .unwrap_or_else(|| self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OverflowPolicy;

    #[test]
    fn test_contiguous_factory() {
        let factory = BufferQueueFactory::contiguous(16)
            .with_params(QueueParams::new().with_capacity(3));
        let queue = factory.alloc_queue(0).unwrap();
        assert_eq!(queue.capacity(), 3);

        let frame = factory.alloc_frame();
        assert!(!frame.is_planar());
        assert_eq!(frame.max_length(), 16);
    }

    #[test]
    fn test_planar_factory() {
        let factory = BufferQueueFactory::planar(3, 8);
        let frame = factory.alloc_frame();
        assert!(frame.is_planar());
        assert_eq!(frame.plane_count(), 3);
        assert_eq!(frame.max_length(), 8);
    }

    #[test]
    fn test_writer_overrides() {
        let factory = BufferQueueFactory::contiguous(4).with_writer_params(
            2,
            QueueParams::new()
                .with_capacity(8)
                .with_policy(OverflowPolicy::DropOldest),
        );
        assert_eq!(factory.alloc_queue(1).unwrap().capacity(), 4);

        let queue = factory.alloc_queue(2).unwrap();
        assert_eq!(queue.capacity(), 8);
        assert_eq!(queue.policy(), OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_layout_from_json() {
        let layout: FrameLayout =
            serde_json::from_str(r#"{"kind": "planar", "planes": 2, "max_length": 960}"#).unwrap();
        assert_eq!(
            layout,
            FrameLayout::Planar {
                planes: 2,
                max_length: 960
            }
        );
    }
}
