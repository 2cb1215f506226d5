//! Pool of reference-counted frames used for shared-frame fan-out.

use std::sync::Arc;
use tracing::debug;

use crate::frames::Frame;
use crate::queue::QueueFactory;

/// Frames a fan-out filter publishes to several queues at once.
///
/// A frame is only handed out again once every queue and consumer has released it,
/// so a producer never writes into a frame a consumer can still see. The pool grows
/// through the filter's [`QueueFactory`] when all frames are still referenced.
#[derive(Debug, Default)]
pub struct SharedFramePool {
    frames: Vec<Arc<dyn Frame>>,
    allocated: usize,
}

impl SharedFramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate until the pool owns at least `count` frames.
    pub fn reserve(&mut self, count: usize, factory: &dyn QueueFactory) {
        while self.allocated < count {
            self.frames.push(Arc::from(factory.alloc_frame()));
            self.allocated += 1;
        }
    }

    /// Take a frame nobody else references.
    pub fn acquire(&mut self, factory: &dyn QueueFactory) -> Arc<dyn Frame> {
        match self
            .frames
            .iter()
            .position(|frame| Arc::strong_count(frame) == 1)
        {
            Some(index) => self.frames.swap_remove(index),
            None => {
                self.allocated += 1;
                debug!("growing shared frame pool to {} frames", self.allocated);
                Arc::from(factory.alloc_frame())
            }
        }
    }

    /// Return a frame after publication. Queues may still hold clones of it.
    pub fn release(&mut self, frame: Arc<dyn Frame>) {
        self.frames.push(frame);
    }

    /// Total frames created by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Frames ready to be handed out right now.
    pub fn available(&self) -> usize {
        self.frames
            .iter()
            .filter(|frame| Arc::strong_count(frame) == 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BufferQueueFactory;

    #[test]
    fn test_reserve() {
        let factory = BufferQueueFactory::contiguous(4);
        let mut pool = SharedFramePool::new();
        pool.reserve(3, &factory);
        pool.reserve(2, &factory);
        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_referenced_frames_are_not_reused() {
        let factory = BufferQueueFactory::contiguous(4);
        let mut pool = SharedFramePool::new();
        pool.reserve(1, &factory);

        let mut first = pool.acquire(&factory);
        assert!(Arc::get_mut(&mut first).is_some());
        let in_flight = Arc::clone(&first);
        pool.release(first);
        assert_eq!(pool.available(), 0);

        let second = pool.acquire(&factory);
        assert!(!Arc::ptr_eq(&second, &in_flight));
        assert_eq!(pool.allocated(), 2);
        pool.release(second);

        drop(in_flight);
        assert_eq!(pool.available(), 2);
        pool.acquire(&factory);
        assert_eq!(pool.allocated(), 2);
    }
}
