//! Pipeline assembly: owns a set of filters, wires them and runs them together.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::filters::{Filter, FilterError, FilterHandle, FilterSnapshot, ReaderId, WriterId};
use crate::task_manager::{TaskError, TaskManager};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no filter with key {0}")]
    UnknownFilter(usize),
    #[error("a filter cannot be connected to itself")]
    SelfConnection,
    #[error("pipeline is already started")]
    AlreadyStarted,
    #[error("pipeline is not started")]
    NotStarted,
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Index of a filter inside its [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterKey(usize);

/// Set of connected filters started and stopped as a unit.
///
/// Filters are added and connected while the pipeline is idle. [`Pipeline::start`]
/// moves each of them onto its own worker task; from then on they are reachable
/// through their [`FilterHandle`].
pub struct Pipeline {
    name: String,
    task_manager: Arc<TaskManager>,
    filters: Vec<Filter>,
    handles: Vec<FilterHandle>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, task_manager: Arc<TaskManager>) -> Self {
        Self {
            name: name.into(),
            task_manager,
            filters: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len().max(self.handles.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_filter(&mut self, filter: Filter) -> Result<FilterKey, PipelineError> {
        if self.is_started() {
            return Err(PipelineError::AlreadyStarted);
        }
        self.filters.push(filter);
        Ok(FilterKey(self.filters.len() - 1))
    }

    pub fn filter(&self, key: FilterKey) -> Option<&Filter> {
        self.filters.get(key.0)
    }

    pub fn filter_mut(&mut self, key: FilterKey) -> Option<&mut Filter> {
        self.filters.get_mut(key.0)
    }

    pub fn handle(&self, key: FilterKey) -> Option<&FilterHandle> {
        self.handles.get(key.0)
    }

    pub fn handles(&self) -> &[FilterHandle] {
        &self.handles
    }

    fn pair_mut(
        &mut self,
        a: FilterKey,
        b: FilterKey,
    ) -> Result<(&mut Filter, &mut Filter), PipelineError> {
        if self.is_started() {
            return Err(PipelineError::AlreadyStarted);
        }
        if a == b {
            return Err(PipelineError::SelfConnection);
        }
        let len = self.filters.len();
        for key in [a, b] {
            if key.0 >= len {
                return Err(PipelineError::UnknownFilter(key.0));
            }
        }

        if a.0 < b.0 {
            let (left, right) = self.filters.split_at_mut(b.0);
            Ok((&mut left[a.0], &mut right[0]))
        } else {
            let (left, right) = self.filters.split_at_mut(a.0);
            Ok((&mut right[0], &mut left[b.0]))
        }
    }

    /// Connect writer `writer_id` of `from` to reader `reader_id` of `to`.
    pub fn connect(
        &mut self,
        from: FilterKey,
        writer_id: WriterId,
        to: FilterKey,
        reader_id: ReaderId,
    ) -> Result<(), PipelineError> {
        let (upstream, downstream) = self.pair_mut(from, to)?;
        Filter::connect(upstream, writer_id, downstream, reader_id)?;
        Ok(())
    }

    /// Connect the lowest free writer of `from` to the lowest free reader of `to`.
    pub fn link(
        &mut self,
        from: FilterKey,
        to: FilterKey,
    ) -> Result<(WriterId, ReaderId), PipelineError> {
        let (upstream, downstream) = self.pair_mut(from, to)?;
        Ok(Filter::link(upstream, downstream)?)
    }

    /// Link every filter in `keys` to the next one.
    pub fn chain(&mut self, keys: &[FilterKey]) -> Result<(), PipelineError> {
        for pair in keys.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Spawn every filter, downstream first so consumers are waiting before the
    /// first frame is produced.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_started() {
            return Err(PipelineError::AlreadyStarted);
        }
        info!("Starting pipeline '{}' with {} filters", self.name, self.filters.len());

        let mut handles = Vec::with_capacity(self.filters.len());
        while let Some(filter) = self.filters.pop() {
            match filter.spawn(&self.task_manager).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!("Pipeline '{}' failed to start: {}", self.name, e);
                    for handle in &handles {
                        handle.stop();
                    }
                    self.filters.clear();
                    return Err(e.into());
                }
            }
        }
        handles.reverse();
        self.handles = handles;
        Ok(())
    }

    /// Stop every filter and wait for their workers, each for at most `timeout`.
    pub async fn stop(&mut self, timeout: Option<Duration>) -> Result<(), PipelineError> {
        if !self.is_started() {
            return Err(PipelineError::NotStarted);
        }
        info!("Stopping pipeline '{}'", self.name);
        for handle in &self.handles {
            handle.stop();
        }

        let mut result = Ok(());
        for handle in &self.handles {
            match self.task_manager.wait_for_filter(handle.task(), timeout).await {
                Ok(()) | Err(TaskError::NotFound) => {}
                Err(e) => {
                    warn!("Filter '{}' did not stop cleanly: {}", handle.name(), e);
                    result = Err(e.into());
                }
            }
        }
        result
    }

    /// Snapshot of every filter, in insertion order.
    pub fn snapshot(&self) -> Vec<FilterSnapshot> {
        if self.is_started() {
            self.handles.iter().map(FilterHandle::snapshot).collect()
        } else {
            self.filters.iter().map(Filter::get_state).collect()
        }
    }
}
