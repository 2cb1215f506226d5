//! Pipeline source: a filter with no readers that produces frames through a handler.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::filters::{Filter, FilterParams, FrameTransform, InputFrames, OutputFrames};
use crate::frames::Frame;
use crate::queue::QueueFactory;

/// Fills the next output frame. Returns `false` when there is nothing to emit.
pub type SourceHandler = Box<dyn FnMut(&mut dyn Frame) -> bool + Send>;

/// Entry point of a pipeline.
///
/// Each cycle the handler fills one frame on the single writer. Frames are numbered
/// in production order. Fan-out belongs to a downstream one-to-many filter.
pub struct PipelineSource {
    handler: SourceHandler,
    produced: u64,
}

impl fmt::Debug for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSource")
            .field("produced", &self.produced)
            .finish()
    }
}

impl PipelineSource {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&mut dyn Frame) -> bool + Send + 'static,
    {
        Self {
            handler: Box::new(handler),
            produced: 0,
        }
    }

    /// Wrap the source in a filter with no readers and one writer. Use a MASTER role
    /// to pace production at the frame time.
    pub fn into_filter(
        self,
        name: impl Into<String>,
        params: FilterParams,
        factory: Arc<dyn QueueFactory>,
    ) -> Filter {
        Filter::new(name, 0, 1, params, factory, self)
    }
}

#[async_trait]
impl FrameTransform for PipelineSource {
    async fn process_frames(&mut self, _inputs: &InputFrames, outputs: &mut OutputFrames) -> bool {
        let Some(frame) = outputs.first_frame_mut() else {
            return false;
        };
        if !(self.handler)(&mut *frame) {
            return false;
        }
        frame.set_sequence_number(self.produced);
        self.produced += 1;
        true
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        state.insert("produced".to_string(), Value::from(self.produced));
    }
}
