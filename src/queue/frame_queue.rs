//! Fixed-capacity single-producer/single-consumer frame queue.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

use crate::frames::{Frame, FrameHandle};
use crate::queue::params::{OverflowPolicy, QueueParams};
use crate::stop::StopSignal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue capacity must be at least one slot")]
    InvalidCapacity,
    #[error("queue is closed")]
    Closed,
    #[error("stop requested while waiting on queue")]
    Stopped,
    #[error("producer already holds a write slot")]
    WriterBusy,
    #[error("consumer already holds a frame")]
    ReaderBusy,
    #[error("queue is already bound to a consumer")]
    ConsumerAlreadyBound,
}

/// Point-in-time view of a queue, for state reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub len: usize,
    pub policy: OverflowPolicy,
    pub written: u64,
    pub read: u64,
    pub dropped: u64,
    pub closed: bool,
}

struct QueueState {
    /// Slot-owned frames not currently holding unread data.
    free: Vec<Box<dyn Frame>>,
    /// Committed, unread frames in publication order.
    ready: VecDeque<FrameHandle>,
    writing: bool,
    reading: bool,
    closed: bool,
    consumer_bound: bool,
    consumer_notify: Arc<Notify>,
    written: u64,
    read: u64,
    dropped: u64,
}

impl QueueState {
    /// Slots that are unavailable to the producer.
    fn occupied(&self) -> usize {
        self.ready.len() + usize::from(self.writing) + usize::from(self.reading)
    }
}

/// Preallocated ring of frames connecting exactly one producer to one consumer.
///
/// Cursor state lives behind a short mutex; the two sides wake each other through
/// [`Notify`]. The only waiting operations are [`FrameQueue::write`] and
/// [`FrameQueue::read`], and both give up as soon as the caller's [`StopSignal`] fires.
pub struct FrameQueue {
    capacity: usize,
    policy: OverflowPolicy,
    state: Mutex<QueueState>,
    writable: Notify,
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

impl FrameQueue {
    /// Build a queue and preallocate every slot with `alloc_frame`.
    ///
    /// # Errors
    /// Returns [`QueueError::InvalidCapacity`] for a zero capacity.
    pub fn new<F>(params: QueueParams, mut alloc_frame: F) -> Result<Self, QueueError>
    where
        F: FnMut() -> Box<dyn Frame>,
    {
        if params.capacity == 0 {
            return Err(QueueError::InvalidCapacity);
        }

        let free = (0..params.capacity).map(|_| alloc_frame()).collect();

        Ok(Self {
            capacity: params.capacity,
            policy: params.policy,
            state: Mutex::new(QueueState {
                free,
                ready: VecDeque::with_capacity(params.capacity),
                writing: false,
                reading: false,
                closed: false,
                consumer_bound: false,
                consumer_notify: Arc::new(Notify::new()),
                written: 0,
                read: 0,
                dropped: 0,
            }),
            writable: Notify::new(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of committed frames not yet taken by the consumer.
    pub fn len(&self) -> usize {
        self.lock_state().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when a producer would find no free slot.
    pub fn is_full(&self) -> bool {
        self.lock_state().occupied() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock_state();
        QueueStats {
            capacity: self.capacity,
            len: state.ready.len(),
            policy: self.policy,
            written: state.written,
            read: state.read,
            dropped: state.dropped,
            closed: state.closed,
        }
    }

    /// Close the queue and wake both sides. Unread frames stay readable.
    pub fn close(&self) {
        let notify = {
            let mut state = self.lock_state();
            state.closed = true;
            Arc::clone(&state.consumer_notify)
        };
        notify.notify_waiters();
        notify.notify_one();
        self.writable.notify_waiters();
    }

    /// Route "frame available" wakeups to `notify`, which lets a filter with several
    /// readers wait on all of them at once.
    pub(crate) fn bind_consumer(&self, notify: Arc<Notify>) -> Result<(), QueueError> {
        let mut state = self.lock_state();
        if state.consumer_bound {
            return Err(QueueError::ConsumerAlreadyBound);
        }
        state.consumer_bound = true;
        state.consumer_notify = notify;
        if !state.ready.is_empty() {
            state.consumer_notify.notify_one();
        }
        Ok(())
    }

    pub(crate) fn unbind_consumer(&self) {
        let mut state = self.lock_state();
        state.consumer_bound = false;
        state.consumer_notify = Arc::new(Notify::new());
    }

    pub fn has_consumer(&self) -> bool {
        self.lock_state().consumer_bound
    }

    fn consumer_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.lock_state().consumer_notify)
    }

    /// Borrow a free slot for writing.
    ///
    /// Returns `Ok(None)` when the queue is full. Under [`OverflowPolicy::DropOldest`]
    /// the oldest unread frame is recycled instead, so `None` only happens when every
    /// occupied slot is currently leased.
    pub fn try_write(self: &Arc<Self>) -> Result<Option<WriteGuard>, QueueError> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.writing {
            return Err(QueueError::WriterBusy);
        }

        if state.occupied() >= self.capacity {
            match self.policy {
                OverflowPolicy::Block => return Ok(None),
                OverflowPolicy::DropOldest => match state.ready.pop_front() {
                    Some(oldest) => {
                        state.dropped += 1;
                        trace!("queue full, dropped oldest frame {}", oldest.as_frame().id());
                        if let FrameHandle::Owned(frame) = oldest {
                            state.free.push(frame);
                        }
                    }
                    None => return Ok(None),
                },
            }
        }

        Ok(state.free.pop().map(|frame| {
            state.writing = true;
            WriteGuard {
                queue: Arc::clone(self),
                frame: Some(frame),
            }
        }))
    }

    /// Count a frame the producer could not place because every occupied slot was
    /// leased.
    pub(crate) fn record_skipped(&self) {
        self.lock_state().dropped += 1;
    }

    /// Take the oldest unread frame. `Ok(None)` when empty; [`QueueError::Closed`] once
    /// the queue is closed and drained.
    pub fn try_read(self: &Arc<Self>) -> Result<Option<ReadGuard>, QueueError> {
        let mut state = self.lock_state();
        if state.reading {
            return Err(QueueError::ReaderBusy);
        }

        match state.ready.pop_front() {
            Some(handle) => {
                state.reading = true;
                state.read += 1;
                Ok(Some(ReadGuard {
                    queue: Arc::clone(self),
                    handle: Some(handle),
                }))
            }
            None if state.closed => Err(QueueError::Closed),
            None => Ok(None),
        }
    }

    /// Wait for a writable slot.
    pub async fn write(self: &Arc<Self>, stop: &StopSignal) -> Result<WriteGuard, QueueError> {
        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if stop.is_stopped() {
                return Err(QueueError::Stopped);
            }
            if let Some(guard) = self.try_write()? {
                return Ok(guard);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = stop.stopped() => return Err(QueueError::Stopped),
            }
        }
    }

    /// Wait for the oldest unread frame.
    pub async fn read(self: &Arc<Self>, stop: &StopSignal) -> Result<ReadGuard, QueueError> {
        loop {
            let notify = self.consumer_notify();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if stop.is_stopped() {
                return Err(QueueError::Stopped);
            }
            if let Some(guard) = self.try_read()? {
                return Ok(guard);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = stop.stopped() => return Err(QueueError::Stopped),
            }
        }
    }

    fn finish_write(&self, frame: Box<dyn Frame>, published: Option<Option<Arc<dyn Frame>>>) {
        let notify = {
            let mut state = self.lock_state();
            state.writing = false;
            match published {
                None => {
                    state.free.push(frame);
                    return;
                }
                Some(Some(shared)) => {
                    state.free.push(frame);
                    state.ready.push_back(FrameHandle::Shared(shared));
                }
                Some(None) => state.ready.push_back(FrameHandle::Owned(frame)),
            }
            state.written += 1;
            Arc::clone(&state.consumer_notify)
        };
        notify.notify_one();
    }

    fn finish_read(&self, handle: FrameHandle) {
        {
            let mut state = self.lock_state();
            state.reading = false;
            if let FrameHandle::Owned(frame) = handle {
                state.free.push(frame);
            }
        }
        self.writable.notify_one();
    }
}

/// A borrowed free slot. Commit it to publish; drop it to give the slot back unused.
#[derive(Debug)]
pub struct WriteGuard {
    queue: Arc<FrameQueue>,
    frame: Option<Box<dyn Frame>>,
}

impl WriteGuard {
    pub fn frame(&self) -> &dyn Frame {
        match self.frame.as_deref() {
            Some(frame) => frame,
            None => unreachable!("write guard frame is only taken on commit or drop"),
        }
    }

    pub fn frame_mut(&mut self) -> &mut dyn Frame {
        match self.frame.as_deref_mut() {
            Some(frame) => frame,
            None => unreachable!("write guard frame is only taken on commit or drop"),
        }
    }

    /// Publish the slot's own frame.
    pub fn commit(mut self) {
        if let Some(frame) = self.frame.take() {
            self.queue.finish_write(frame, Some(None));
        }
    }

    /// Publish a shared handle in this slot. The slot's own frame stays unused in the
    /// free pool.
    pub fn commit_shared(mut self, shared: Arc<dyn Frame>) {
        if let Some(frame) = self.frame.take() {
            self.queue.finish_write(frame, Some(Some(shared)));
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.queue.finish_write(frame, None);
        }
    }
}

/// The oldest unread frame, leased to the consumer. Dropping it consumes the frame.
#[derive(Debug)]
pub struct ReadGuard {
    queue: Arc<FrameQueue>,
    handle: Option<FrameHandle>,
}

impl ReadGuard {
    fn handle(&self) -> &FrameHandle {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("read guard handle is only taken on drop"),
        }
    }

    pub fn frame(&self) -> &dyn Frame {
        self.handle().as_frame()
    }

    /// Mutable access for owned frames. Shared frames are read-only while any other
    /// queue, consumer or pool still references them.
    pub fn frame_mut(&mut self) -> Option<&mut dyn Frame> {
        self.handle.as_mut().and_then(FrameHandle::as_frame_mut)
    }

    pub fn shared(&self) -> Option<&Arc<dyn Frame>> {
        match self.handle() {
            FrameHandle::Shared(frame) => Some(frame),
            FrameHandle::Owned(_) => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.handle().is_shared()
    }

    /// Consume the frame now instead of at end of scope.
    pub fn release(self) {}
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.queue.finish_read(handle);
        }
    }
}
