//! Test transformations and helpers shared by the filter tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::filters::base::FrameTransform;
use crate::filters::cycle::{InputFrames, OutputFrames};
use crate::filters::one_to_many::FanOutProcess;
use crate::filters::one_to_one::OneToOneProcess;
use crate::frames::{copy_frame, Frame, RawFrame};
use crate::queue::{BufferQueueFactory, FrameQueue, OverflowPolicy, QueueFactory, QueueParams};

/// Transformation with a fixed processing time and a switchable outcome.
#[derive(Debug)]
pub(crate) struct FilterMockup {
    process_time: Duration,
    got_frame: Arc<AtomicBool>,
    stamps: Arc<Mutex<Vec<Instant>>>,
}

impl FilterMockup {
    pub(crate) fn new(process_time: Duration) -> Self {
        Self {
            process_time,
            got_frame: Arc::new(AtomicBool::new(true)),
            stamps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn got_frame(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.got_frame)
    }

    /// Start time of every invocation.
    pub(crate) fn stamps(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.stamps)
    }

    async fn simulate(&mut self) -> bool {
        self.stamps.lock().unwrap().push(Instant::now());
        if !self.process_time.is_zero() {
            tokio::time::sleep(self.process_time).await;
        }
        self.got_frame.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OneToOneProcess for FilterMockup {
    async fn process(&mut self, input: &dyn Frame, output: &mut dyn Frame) -> bool {
        let got = self.simulate().await;
        got && copy_frame(input, output).is_ok()
    }
}

#[async_trait]
impl FanOutProcess for FilterMockup {
    async fn process_fan_out(&mut self, input: &dyn Frame, outputs: &mut OutputFrames) -> bool {
        let got = self.simulate().await;
        let ids: Vec<_> = outputs.writer_ids().collect();
        for id in ids {
            if let Some(output) = outputs.frame_mut(id) {
                if copy_frame(input, output).is_err() {
                    return false;
                }
            }
        }
        got
    }
}

/// Generic transformation counting the inputs it sees and writing that count into
/// every output.
#[derive(Debug, Default)]
pub(crate) struct CountingTransform {
    pub(crate) inputs_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameTransform for CountingTransform {
    async fn process_frames(&mut self, inputs: &InputFrames, outputs: &mut OutputFrames) -> bool {
        let seen = self.inputs_seen.fetch_add(inputs.len(), Ordering::SeqCst) + inputs.len();
        let ids: Vec<_> = outputs.writer_ids().collect();
        for id in ids {
            if let Some(output) = outputs.frame_mut(id) {
                let _ = output.write_bytes(&[seen as u8]);
            }
        }
        true
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        state.insert(
            "inputs_seen".to_string(),
            Value::from(self.inputs_seen.load(Ordering::SeqCst)),
        );
    }
}

/// Factory with contiguous 4-byte frames and `Block` queues of `capacity` slots.
pub(crate) fn mock_factory(capacity: usize) -> Arc<dyn QueueFactory> {
    Arc::new(
        BufferQueueFactory::contiguous(4).with_params(QueueParams::new().with_capacity(capacity)),
    )
}

/// Like [`mock_factory`] but with `DropOldest` queues, so an unconsumed writer never
/// stalls the filter.
pub(crate) fn lossy_factory(capacity: usize) -> Arc<dyn QueueFactory> {
    Arc::new(
        BufferQueueFactory::contiguous(4).with_params(
            QueueParams::new()
                .with_capacity(capacity)
                .with_policy(OverflowPolicy::DropOldest),
        ),
    )
}

/// Standalone queue standing in for an upstream filter's writer.
pub(crate) fn upstream_queue(capacity: usize) -> Arc<FrameQueue> {
    Arc::new(
        FrameQueue::new(QueueParams::new().with_capacity(capacity), || RawFrame::boxed(4)).unwrap(),
    )
}

/// Publish `count` frames; frame `i` carries byte `i` and sequence number `i`,
/// continuing from what the queue already published.
pub(crate) fn feed(queue: &Arc<FrameQueue>, count: usize) {
    let start = queue.stats().written;
    for i in start..start + count as u64 {
        let mut slot = queue.try_write().unwrap().expect("upstream queue has room");
        slot.frame_mut().write_bytes(&[i as u8]).unwrap();
        slot.frame_mut().set_sequence_number(i);
        slot.commit();
    }
}
