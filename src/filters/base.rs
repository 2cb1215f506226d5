//! Generic filter node.
//!
//! A [`Filter`] owns its writer queues (allocated through the injected
//! [`QueueFactory`]), references the upstream queues it reads from, and runs one
//! processing cycle at a time through an injected transformation. The one-to-one and
//! one-to-many specializations only differ in the transformation they inject.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::clock::{BaseClock, SystemClock};
use crate::filters::cycle::{InputFrames, OutputFrames};
use crate::filters::handle::FilterHandle;
use crate::filters::one_to_many::{self, FanOutProcess};
use crate::filters::one_to_one::{self, OneToOneProcess};
use crate::filters::params::{FilterParams, FilterRole};
use crate::filters::shared::SharedFramePool;
use crate::filters::state::{FilterSnapshot, FilterState, FilterStatus};
use crate::filters::{ReaderId, WriterId};
use crate::queue::{FrameQueue, OverflowPolicy, QueueError, QueueFactory};
use crate::stop::StopSignal;
use crate::task_manager::{TaskContext, TaskManager};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter has been stopped")]
    Stopped,
    #[error("filter accepts at most {max} readers")]
    TooManyReaders { max: usize },
    #[error("filter accepts at most {max} writers")]
    TooManyWriters { max: usize },
    #[error("reader {0} is already attached")]
    ReaderInUse(ReaderId),
    #[error("writer {0} is already connected to a consumer")]
    WriterInUse(WriterId),
    #[error("reader {0} is not attached")]
    ReaderNotAttached(ReaderId),
    #[error("writer {0} is not attached")]
    WriterNotAttached(WriterId),
    #[error("writer {0} queue is closed; detach it before reconnecting")]
    WriterClosed(WriterId),
    #[error("filter is already running")]
    AlreadyRunning,
    #[error("queue error: {0}")]
    Queue(QueueError),
    #[error("task error: {0}")]
    Task(String),
}

impl From<QueueError> for FilterError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Stopped => FilterError::Stopped,
            other => FilterError::Queue(other),
        }
    }
}

/// Transformation over any number of inputs and outputs.
#[async_trait]
pub trait FrameTransform: Send {
    /// Run one transformation. Return `true` when the output frames hold data to publish.
    async fn process_frames(&mut self, inputs: &InputFrames, outputs: &mut OutputFrames) -> bool;

    /// Add transformation-specific fields to the filter's state report.
    fn get_state(&self, _state: &mut Map<String, Value>) {}
}

/// Transformation variant selected at construction.
pub(crate) enum Transform {
    Generic(Box<dyn FrameTransform>),
    OneToOne(Box<dyn OneToOneProcess>),
    OneToMany(Box<dyn FanOutProcess>),
}

impl Transform {
    async fn apply(&mut self, inputs: &InputFrames, outputs: &mut OutputFrames) -> bool {
        match self {
            Transform::Generic(transform) => transform.process_frames(inputs, outputs).await,
            Transform::OneToOne(process) => one_to_one::apply(process.as_mut(), inputs, outputs).await,
            Transform::OneToMany(process) => {
                one_to_many::apply(process.as_mut(), inputs, outputs).await
            }
        }
    }

    fn get_state(&self, state: &mut Map<String, Value>) {
        match self {
            Transform::Generic(transform) => transform.get_state(state),
            Transform::OneToOne(process) => process.get_state(state),
            Transform::OneToMany(process) => process.get_state(state),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Transform::Generic(_) => "generic",
            Transform::OneToOne(_) => "one_to_one",
            Transform::OneToMany(_) => "one_to_many",
        }
    }
}

/// Pipeline node with fixed reader/writer cardinality.
pub struct Filter {
    name: String,
    max_readers: usize,
    max_writers: usize,
    params: FilterParams,
    readers: BTreeMap<ReaderId, Arc<FrameQueue>>,
    writers: BTreeMap<WriterId, Arc<FrameQueue>>,
    factory: Arc<dyn QueueFactory>,
    transform: Transform,
    clock: Box<dyn BaseClock>,
    status: Arc<FilterStatus>,
    input_notify: Arc<Notify>,
    shared_pool: SharedFramePool,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("kind", &self.transform.kind())
            .field("max_readers", &self.max_readers)
            .field("max_writers", &self.max_writers)
            .field("params", &self.params)
            .field("state", &self.status.state())
            .finish()
    }
}

impl Filter {
    /// Create a filter with a generic transformation.
    pub fn new<T>(
        name: impl Into<String>,
        max_readers: usize,
        max_writers: usize,
        params: FilterParams,
        factory: Arc<dyn QueueFactory>,
        transform: T,
    ) -> Self
    where
        T: FrameTransform + 'static,
    {
        Self::with_transform(
            name.into(),
            max_readers,
            max_writers,
            params,
            factory,
            Transform::Generic(Box::new(transform)),
        )
    }

    pub(crate) fn with_transform(
        name: String,
        max_readers: usize,
        max_writers: usize,
        params: FilterParams,
        factory: Arc<dyn QueueFactory>,
        transform: Transform,
    ) -> Self {
        debug!(
            "Creating {} filter '{}' ({} readers, {} writers, {:?})",
            transform.kind(),
            name,
            max_readers,
            max_writers,
            params.role
        );
        Self {
            status: Arc::new(FilterStatus::new(name.clone())),
            name,
            max_readers,
            max_writers,
            params,
            readers: BTreeMap::new(),
            writers: BTreeMap::new(),
            factory,
            transform,
            clock: Box::new(SystemClock::new_started()),
            input_notify: Arc::new(Notify::new()),
            shared_pool: SharedFramePool::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    pub fn role(&self) -> FilterRole {
        self.params.role
    }

    pub fn max_readers(&self) -> usize {
        self.max_readers
    }

    pub fn max_writers(&self) -> usize {
        self.max_writers
    }

    pub fn state(&self) -> FilterState {
        self.status.state()
    }

    /// Shared status, usable to stop or observe the filter from another thread.
    pub fn status(&self) -> Arc<FilterStatus> {
        Arc::clone(&self.status)
    }

    /// Request termination. See [`FilterStatus::stop`].
    pub fn stop(&self) -> bool {
        self.status.stop()
    }

    /// Replace the clock used for cycle timing.
    pub fn set_clock(&mut self, mut clock: Box<dyn BaseClock>) {
        if !clock.is_running() {
            if let Err(e) = clock.start() {
                warn!("Filter '{}': failed to start clock: {}", self.name, e);
            }
        }
        self.clock = clock;
    }

    pub fn reader(&self, reader_id: ReaderId) -> Option<Arc<FrameQueue>> {
        self.readers.get(&reader_id).cloned()
    }

    pub fn writer(&self, writer_id: WriterId) -> Option<Arc<FrameQueue>> {
        self.writers.get(&writer_id).cloned()
    }

    pub fn reader_ids(&self) -> Vec<ReaderId> {
        self.readers.keys().copied().collect()
    }

    pub fn writer_ids(&self) -> Vec<WriterId> {
        self.writers.keys().copied().collect()
    }

    /// Lowest reader id not yet attached.
    pub fn generate_reader_id(&self) -> Result<ReaderId, FilterError> {
        if self.readers.len() >= self.max_readers {
            return Err(FilterError::TooManyReaders {
                max: self.max_readers,
            });
        }
        Ok(lowest_free_id(self.readers.keys().copied()))
    }

    /// Lowest writer id not yet attached.
    pub fn generate_writer_id(&self) -> Result<WriterId, FilterError> {
        if self.writers.len() >= self.max_writers {
            return Err(FilterError::TooManyWriters {
                max: self.max_writers,
            });
        }
        Ok(lowest_free_id(self.writers.keys().copied()))
    }

    fn ensure_active(&self) -> Result<(), FilterError> {
        if self.status.is_stop_requested() {
            return Err(FilterError::Stopped);
        }
        Ok(())
    }

    fn check_writer_slot(&self, writer_id: WriterId) -> Result<(), FilterError> {
        self.ensure_active()?;
        match self.writers.get(&writer_id) {
            Some(queue) if queue.has_consumer() => Err(FilterError::WriterInUse(writer_id)),
            Some(queue) if queue.is_closed() => Err(FilterError::WriterClosed(writer_id)),
            Some(_) => Ok(()),
            None if self.writers.len() >= self.max_writers => Err(FilterError::TooManyWriters {
                max: self.max_writers,
            }),
            None => Ok(()),
        }
    }

    fn check_reader_slot(&self, reader_id: ReaderId) -> Result<(), FilterError> {
        self.ensure_active()?;
        if self.readers.contains_key(&reader_id) {
            return Err(FilterError::ReaderInUse(reader_id));
        }
        if self.readers.len() >= self.max_readers {
            return Err(FilterError::TooManyReaders {
                max: self.max_readers,
            });
        }
        Ok(())
    }

    /// Return the queue behind `writer_id`, allocating it through the factory on
    /// first use.
    pub fn attach_writer(&mut self, writer_id: WriterId) -> Result<Arc<FrameQueue>, FilterError> {
        self.ensure_active()?;
        if let Some(queue) = self.writers.get(&writer_id) {
            if queue.is_closed() {
                return Err(FilterError::WriterClosed(writer_id));
            }
            return Ok(Arc::clone(queue));
        }
        if self.writers.len() >= self.max_writers {
            return Err(FilterError::TooManyWriters {
                max: self.max_writers,
            });
        }

        let queue = Arc::new(self.factory.alloc_queue(writer_id)?);
        if self.params.shared_frames {
            // one frame per slot of the deepest queue, plus the one being filled
            let wanted = self
                .writers
                .values()
                .map(|q| q.capacity())
                .chain(std::iter::once(queue.capacity()))
                .max()
                .unwrap_or(0)
                + 1;
            self.shared_pool.reserve(wanted, self.factory.as_ref());
        }
        debug!(
            "Filter '{}': attached writer {} (capacity {}, {:?})",
            self.name,
            writer_id,
            queue.capacity(),
            queue.policy()
        );
        self.writers.insert(writer_id, Arc::clone(&queue));
        Ok(queue)
    }

    /// Bind an upstream queue to `reader_id`.
    pub fn attach_reader(
        &mut self,
        reader_id: ReaderId,
        queue: Arc<FrameQueue>,
    ) -> Result<(), FilterError> {
        self.check_reader_slot(reader_id)?;
        queue.bind_consumer(Arc::clone(&self.input_notify))?;
        debug!("Filter '{}': attached reader {}", self.name, reader_id);
        self.readers.insert(reader_id, queue);
        Ok(())
    }

    /// Connect `upstream`'s writer slot to `downstream`'s reader slot.
    ///
    /// Both slots are validated before either filter is modified.
    pub fn connect(
        upstream: &mut Filter,
        writer_id: WriterId,
        downstream: &mut Filter,
        reader_id: ReaderId,
    ) -> Result<(), FilterError> {
        upstream.check_writer_slot(writer_id)?;
        downstream.check_reader_slot(reader_id)?;

        let queue = upstream.attach_writer(writer_id)?;
        downstream.attach_reader(reader_id, queue)?;
        info!(
            "Connected '{}' writer {} -> '{}' reader {}",
            upstream.name, writer_id, downstream.name, reader_id
        );
        Ok(())
    }

    /// Connect the lowest free writer of `upstream` to the lowest free reader of
    /// `downstream`.
    pub fn link(
        upstream: &mut Filter,
        downstream: &mut Filter,
    ) -> Result<(WriterId, ReaderId), FilterError> {
        let writer_id = upstream.generate_writer_id()?;
        let reader_id = downstream.generate_reader_id()?;
        Self::connect(upstream, writer_id, downstream, reader_id)?;
        Ok((writer_id, reader_id))
    }

    /// Unbind and close the queue behind `reader_id`.
    pub fn detach_reader(&mut self, reader_id: ReaderId) -> Result<Arc<FrameQueue>, FilterError> {
        self.ensure_active()?;
        let queue = self
            .readers
            .remove(&reader_id)
            .ok_or(FilterError::ReaderNotAttached(reader_id))?;
        queue.unbind_consumer();
        queue.close();
        debug!("Filter '{}': detached reader {}", self.name, reader_id);
        Ok(queue)
    }

    /// Drop the writer slot and close its queue.
    pub fn detach_writer(&mut self, writer_id: WriterId) -> Result<Arc<FrameQueue>, FilterError> {
        self.ensure_active()?;
        let queue = self
            .writers
            .remove(&writer_id)
            .ok_or(FilterError::WriterNotAttached(writer_id))?;
        queue.close();
        debug!("Filter '{}': detached writer {}", self.name, writer_id);
        Ok(queue)
    }

    /// Structured snapshot, including the transformation's own fields.
    pub fn get_state(&self) -> FilterSnapshot {
        let mut details = Map::new();
        details.insert("kind".to_string(), Value::from(self.transform.kind()));
        if self.params.shared_frames {
            details.insert(
                "shared_pool_frames".to_string(),
                Value::from(self.shared_pool.allocated()),
            );
        }
        self.transform.get_state(&mut details);
        FilterSnapshot::collect(
            &self.params,
            &self.status,
            &self.readers,
            &self.writers,
            details,
        )
    }

    fn now(&self) -> u64 {
        self.clock.get_time().unwrap_or(0)
    }

    /// Run one processing cycle.
    ///
    /// Returns `Ok(true)` when the transformation produced output, `Ok(false)` when
    /// there was no input (MASTER) or the transformation declined, and
    /// `Err(FilterError::Stopped)` once stop has been requested.
    pub async fn process_frame(&mut self) -> Result<bool, FilterError> {
        self.ensure_active()?;
        let started = self.now();

        let inputs = match self.demand_inputs().await? {
            Some(inputs) => inputs,
            None => {
                self.status.record_idle();
                trace!("Filter '{}': no input this cycle", self.name);
                return Ok(false);
            }
        };

        let stop = Arc::clone(&self.status);
        let mut outputs = Self::demand_outputs(&self.writers, stop.stop_signal()).await?;
        if self.params.shared_frames && !outputs.is_empty() {
            outputs.set_shared(self.shared_pool.acquire(self.factory.as_ref()));
        }

        let produced = self.transform.apply(&inputs, &mut outputs).await;

        let (published, shared) = outputs.publish(produced);
        if let Some(frame) = shared {
            self.shared_pool.release(frame);
        }
        let consumed = inputs.len();
        drop(inputs);

        let elapsed = self.now().saturating_sub(started);
        self.status.record_cycle(consumed, published, elapsed);
        trace!(
            "Filter '{}': cycle consumed {} published {} in {}us",
            self.name,
            consumed,
            published,
            elapsed / 1_000
        );
        Ok(produced)
    }

    async fn demand_inputs(&mut self) -> Result<Option<InputFrames>, FilterError> {
        if self.max_readers == 0 {
            return Ok(Some(InputFrames::default()));
        }
        if self.params.role == FilterRole::Master {
            let inputs = collect_ready(&self.readers)?;
            return Ok((!inputs.is_empty()).then_some(inputs));
        }

        let notify = Arc::clone(&self.input_notify);
        let status = Arc::clone(&self.status);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if status.is_stop_requested() {
                return Err(FilterError::Stopped);
            }
            let inputs = collect_ready(&self.readers)?;
            if !inputs.is_empty() {
                return Ok(Some(inputs));
            }
            if inputs_exhausted(&self.readers) {
                debug!(
                    "Filter '{}': all inputs closed, waiting for stop",
                    self.name
                );
                status.stop_signal().stopped().await;
                return Err(FilterError::Stopped);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = status.stop_signal().stopped() => return Err(FilterError::Stopped),
            }
        }
    }

    async fn demand_outputs(
        writers: &BTreeMap<WriterId, Arc<FrameQueue>>,
        stop: &StopSignal,
    ) -> Result<OutputFrames, FilterError> {
        let mut slots = BTreeMap::new();
        for (&writer_id, queue) in writers {
            let slot = match queue.policy() {
                OverflowPolicy::Block => queue.write(stop).await.map(Some),
                OverflowPolicy::DropOldest => {
                    if stop.is_stopped() {
                        return Err(FilterError::Stopped);
                    }
                    queue.try_write()
                }
            };
            match slot {
                Ok(Some(slot)) => {
                    slots.insert(writer_id, slot);
                }
                Ok(None) => {
                    // every slot leased by the consumer; this writer misses the cycle
                    queue.record_skipped();
                    trace!("writer {} fully leased, skipping", writer_id);
                }
                Err(QueueError::Closed) => trace!("writer {} closed, skipping", writer_id),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(OutputFrames::new(slots))
    }

    /// Run cycles until stop is requested, then close every queue.
    ///
    /// # Errors
    /// [`FilterError::Stopped`] when stop was requested before the loop started, and
    /// [`FilterError::AlreadyRunning`] when the filter is not in the `Created` state.
    pub async fn run(&mut self) -> Result<(), FilterError> {
        self.run_loop(None).await
    }

    pub(crate) async fn run_with_context(&mut self, ctx: &TaskContext) -> Result<(), FilterError> {
        self.run_loop(Some(ctx)).await
    }

    async fn run_loop(&mut self, ctx: Option<&TaskContext>) -> Result<(), FilterError> {
        if !self.status.begin_running() {
            return Err(match self.status.state() {
                FilterState::Running => FilterError::AlreadyRunning,
                _ => FilterError::Stopped,
            });
        }
        info!(
            "Filter '{}' running as {:?} ({} readers, {} writers)",
            self.name,
            self.params.role,
            self.readers.len(),
            self.writers.len()
        );

        let status = Arc::clone(&self.status);
        let frame_time = self.params.frame_time;
        while !status.is_stop_requested() {
            if let Some(ctx) = ctx {
                ctx.reset_watchdog();
            }
            let cycle_start = self.now();

            match self.process_frame().await {
                Ok(_) => {}
                Err(FilterError::Stopped) => break,
                Err(e) => {
                    warn!("Filter '{}': cycle failed: {}", self.name, e);
                    tokio::task::yield_now().await;
                }
            }

            match self.params.role {
                FilterRole::Master => {
                    let elapsed = Duration::from_nanos(self.now().saturating_sub(cycle_start));
                    if elapsed < frame_time {
                        tokio::select! {
                            _ = tokio::time::sleep(frame_time - elapsed) => {}
                            _ = status.stop_signal().stopped() => break,
                        }
                    } else {
                        status.record_overrun();
                        trace!(
                            "Filter '{}': cycle overran frame time by {:?}",
                            self.name,
                            elapsed - frame_time
                        );
                    }
                }
                FilterRole::Slave => {
                    if self.max_readers == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
        }

        self.close_queues();
        if status.finish() {
            info!("Filter '{}' stopped", self.name);
        }
        Ok(())
    }

    fn close_queues(&self) {
        for queue in self.writers.values().chain(self.readers.values()) {
            queue.close();
        }
    }

    /// Move the filter onto its own worker task.
    pub async fn spawn(self, manager: &TaskManager) -> Result<FilterHandle, FilterError> {
        match self.status.state() {
            FilterState::Created => {}
            FilterState::Running => return Err(FilterError::AlreadyRunning),
            FilterState::Stopping | FilterState::Stopped => return Err(FilterError::Stopped),
        }

        let status = Arc::clone(&self.status);
        let params = self.params.clone();
        let readers = self.readers.clone();
        let writers = self.writers.clone();
        let task = manager
            .spawn_filter(self)
            .await
            .map_err(|e| FilterError::Task(e.to_string()))?;

        Ok(FilterHandle::new(status, params, readers, writers, task))
    }
}

fn lowest_free_id(used: impl Iterator<Item = u32>) -> u32 {
    let mut candidate = 0;
    for id in used {
        if id == candidate {
            candidate += 1;
        } else if id > candidate {
            break;
        }
    }
    candidate
}

fn collect_ready(readers: &BTreeMap<ReaderId, Arc<FrameQueue>>) -> Result<InputFrames, FilterError> {
    let mut inputs = InputFrames::default();
    for (&reader_id, queue) in readers {
        match queue.try_read() {
            Ok(Some(guard)) => inputs.insert(reader_id, guard),
            Ok(None) | Err(QueueError::Closed) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(inputs)
}

fn inputs_exhausted(readers: &BTreeMap<ReaderId, Arc<FrameQueue>>) -> bool {
    readers.values().all(|queue| queue.is_closed() && queue.is_empty())
}
