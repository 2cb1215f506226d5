//! Handle to a filter running on its own worker task.

use serde_json::Map;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::filters::params::FilterParams;
use crate::filters::state::{FilterSnapshot, FilterState, FilterStatus};
use crate::filters::{ReaderId, WriterId};
use crate::queue::FrameQueue;
use crate::task_manager::TaskHandle;

/// Observes and stops a spawned filter. Cheap to clone; every clone controls the
/// same filter.
#[derive(Debug, Clone)]
pub struct FilterHandle {
    status: Arc<FilterStatus>,
    params: FilterParams,
    readers: BTreeMap<ReaderId, Arc<FrameQueue>>,
    writers: BTreeMap<WriterId, Arc<FrameQueue>>,
    task: TaskHandle,
}

impl FilterHandle {
    pub(crate) fn new(
        status: Arc<FilterStatus>,
        params: FilterParams,
        readers: BTreeMap<ReaderId, Arc<FrameQueue>>,
        writers: BTreeMap<WriterId, Arc<FrameQueue>>,
        task: TaskHandle,
    ) -> Self {
        Self {
            status,
            params,
            readers,
            writers,
            task,
        }
    }

    pub fn name(&self) -> &str {
        self.status.name()
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    pub fn state(&self) -> FilterState {
        self.status.state()
    }

    pub fn status(&self) -> &Arc<FilterStatus> {
        &self.status
    }

    pub fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Request termination. Safe from any thread; only the first call has an effect.
    pub fn stop(&self) -> bool {
        self.status.stop()
    }

    pub fn reader(&self, reader_id: ReaderId) -> Option<&Arc<FrameQueue>> {
        self.readers.get(&reader_id)
    }

    pub fn writer(&self, writer_id: WriterId) -> Option<&Arc<FrameQueue>> {
        self.writers.get(&writer_id)
    }

    /// Snapshot of lifecycle, counters and queues. Transformation details are only
    /// available from [`crate::filters::Filter::get_state`] before spawning.
    pub fn snapshot(&self) -> FilterSnapshot {
        FilterSnapshot::collect(
            &self.params,
            &self.status,
            &self.readers,
            &self.writers,
            Map::new(),
        )
    }
}
