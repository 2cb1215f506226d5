//! One input fanned out to several outputs.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::filters::base::{Filter, Transform};
use crate::filters::cycle::{InputFrames, OutputFrames};
use crate::filters::params::FilterParams;
use crate::frames::{copy_frame, Frame};
use crate::queue::QueueFactory;

/// Transformation of a one-to-many filter.
///
/// `outputs` holds a writable slot for every open writer. Writers the process does
/// not [`select`](OutputFrames::select) are left unpublished for this cycle, unless it
/// selects none at all, in which case all of them publish.
#[async_trait]
pub trait FanOutProcess: Send {
    async fn process_fan_out(&mut self, input: &dyn Frame, outputs: &mut OutputFrames) -> bool;

    fn get_state(&self, _state: &mut Map<String, Value>) {}
}

impl Filter {
    /// Filter with one reader and up to `max_writers` writers.
    pub fn one_to_many<P>(
        name: impl Into<String>,
        max_writers: usize,
        params: FilterParams,
        factory: Arc<dyn QueueFactory>,
        process: P,
    ) -> Self
    where
        P: FanOutProcess + 'static,
    {
        Filter::with_transform(
            name.into(),
            1,
            max_writers,
            params,
            factory,
            Transform::OneToMany(Box::new(process)),
        )
    }
}

pub(crate) async fn apply(
    process: &mut dyn FanOutProcess,
    inputs: &InputFrames,
    outputs: &mut OutputFrames,
) -> bool {
    let Some(input) = inputs.first() else {
        return false;
    };
    if outputs.is_empty() {
        return false;
    }
    process.process_fan_out(input, outputs).await
}

/// Sends a copy of every input to every writer. With shared frames the input is
/// copied once.
#[derive(Debug, Default)]
pub struct Broadcast {
    copies: u64,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FanOutProcess for Broadcast {
    async fn process_fan_out(&mut self, input: &dyn Frame, outputs: &mut OutputFrames) -> bool {
        let ids: Vec<_> = if outputs.is_shared() {
            outputs.writer_ids().take(1).collect()
        } else {
            outputs.writer_ids().collect()
        };

        for id in ids {
            let Some(output) = outputs.frame_mut(id) else {
                continue;
            };
            if let Err(e) = copy_frame(input, output) {
                tracing::warn!("broadcast dropped frame {}: {}", input.id(), e);
                return false;
            }
            self.copies += 1;
        }
        true
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        state.insert("copies".to_string(), Value::from(self.copies));
    }
}
