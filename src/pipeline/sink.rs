//! Pipeline sink: a filter with no writers that hands every input to a handler.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::filters::{Filter, FilterParams, FrameTransform, InputFrames, OutputFrames, ReaderId};
use crate::frames::Frame;
use crate::queue::BufferQueueFactory;

/// Receives each consumed frame with the reader it arrived on.
pub type SinkHandler = Box<dyn FnMut(ReaderId, &dyn Frame) + Send>;

/// Exit point of a pipeline. Frames are consumed as soon as the handler returns.
pub struct PipelineSink {
    handler: SinkHandler,
    consumed: u64,
}

impl fmt::Debug for PipelineSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSink")
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl PipelineSink {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(ReaderId, &dyn Frame) + Send + 'static,
    {
        Self {
            handler: Box::new(handler),
            consumed: 0,
        }
    }

    /// Wrap the sink in a filter with `readers` reader slots and no writers.
    pub fn into_filter(self, name: impl Into<String>, readers: usize, params: FilterParams) -> Filter {
        Filter::new(
            name,
            readers,
            0,
            params,
            Arc::new(BufferQueueFactory::default()),
            self,
        )
    }
}

#[async_trait]
impl FrameTransform for PipelineSink {
    async fn process_frames(&mut self, inputs: &InputFrames, _outputs: &mut OutputFrames) -> bool {
        for (reader_id, frame) in inputs.iter() {
            (self.handler)(reader_id, frame);
            self.consumed += 1;
        }
        !inputs.is_empty()
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        state.insert("consumed".to_string(), Value::from(self.consumed));
    }
}
