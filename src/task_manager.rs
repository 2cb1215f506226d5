// Task manager running one worker per filter, with an optional watchdog per worker

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::filters::{Filter, FilterStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    pub enable_watchdog_timers: bool,
    pub enable_watchdog_logging: bool,
    pub default_watchdog_timeout: Duration,
    /// How long `shutdown` waits for stopped workers before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            enable_watchdog_timers: false,
            enable_watchdog_logging: false,
            default_watchdog_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl TaskManagerConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_watchdog(mut self, timeout: Duration) -> Self {
        self.enable_watchdog_timers = true;
        self.default_watchdog_timeout = timeout;
        self
    }

    pub fn with_watchdog_logging(mut self, enabled: bool) -> Self {
        self.enable_watchdog_logging = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct TaskData {
    pub id: Uuid,
    pub name: String,
    pub created_at: Instant,
    pub enable_watchdog_timers: bool,
    pub watchdog_timeout: Duration,
    status: Option<Arc<FilterStatus>>,
}

pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<Uuid, TaskData>>>,
    task_handles: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
    config: TaskManagerConfig,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            task_handles: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// Run an arbitrary future as a managed task. Only tests drive bare tasks; filters
    /// go through [`TaskManager::spawn_filter`].
    #[cfg(test)]
    pub(crate) async fn create_task<F, Fut>(
        &self,
        name: String,
        future: F,
        watchdog_config: Option<WatchdogConfig>,
    ) -> Result<TaskHandle, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.spawn_task(name, future, watchdog_config, None).await
    }

    /// Run `filter` on its own worker task until it is stopped.
    ///
    /// The watchdog is reset once per processing cycle, so it reports a filter whose
    /// cycle stalls for longer than the filter's `watchdog_timeout`.
    pub async fn spawn_filter(&self, filter: Filter) -> Result<TaskHandle, TaskError> {
        let name = filter.name().to_string();
        let status = filter.status();
        let watchdog_config = filter.params().watchdog_timeout.map(|timeout| WatchdogConfig {
            enable_timers: true,
            enable_logging: self.config.enable_watchdog_logging,
            timeout: Some(timeout),
        });

        self.spawn_task(
            name,
            move |ctx| async move {
                let mut filter = filter;
                if let Err(e) = filter.run_with_context(&ctx).await {
                    warn!("Filter '{}' did not run: {}", ctx.name, e);
                }
            },
            watchdog_config,
            Some(status),
        )
        .await
    }

    async fn spawn_task<F, Fut>(
        &self,
        name: String,
        future: F,
        watchdog_config: Option<WatchdogConfig>,
        status: Option<Arc<FilterStatus>>,
    ) -> Result<TaskHandle, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let task_id = Uuid::new_v4();

        // Setup watchdog if enabled
        let enable_timers = watchdog_config
            .as_ref()
            .map(|c| c.enable_timers)
            .unwrap_or(self.config.enable_watchdog_timers);
        let (watchdog_tx, watchdog_rx) = if enable_timers {
            let (tx, rx) = broadcast::channel(16);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let watchdog_timeout = watchdog_config
            .as_ref()
            .and_then(|c| c.timeout)
            .unwrap_or(self.config.default_watchdog_timeout);
        if enable_timers && watchdog_timeout.is_zero() {
            return Err(TaskError::InvalidWatchdogTimeout);
        }

        let context = TaskContext {
            id: task_id,
            name: name.clone(),
            watchdog_tx,
        };

        // Register before spawning so a short-lived task cannot finish before its
        // entry exists
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(
                task_id,
                TaskData {
                    id: task_id,
                    name: name.clone(),
                    created_at: Instant::now(),
                    enable_watchdog_timers: enable_timers,
                    watchdog_timeout,
                    status,
                },
            );
        }

        let tasks_cleanup = Arc::clone(&self.tasks);
        let handle = tokio::spawn({
            let task_name = name.clone();
            async move {
                info!("Task '{}' ({}) started", task_name, task_id);
                future(context).await;
                info!("Task '{}' ({}) completed", task_name, task_id);

                if tasks_cleanup.write().await.remove(&task_id).is_some() {
                    debug!("Cleaned up task '{}' ({})", task_name, task_id);
                }
            }
        });

        if let Some(watchdog_rx) = watchdog_rx {
            let enable_logging = watchdog_config
                .as_ref()
                .map(|c| c.enable_logging)
                .unwrap_or(self.config.enable_watchdog_logging);

            tokio::spawn(Self::watchdog_monitor(
                format!("watchdog-{}", name),
                task_id,
                watchdog_rx,
                watchdog_timeout,
                enable_logging,
            ));
        }

        {
            let mut task_handles = self.task_handles.write().await;
            task_handles.insert(task_id, handle);
        }

        Ok(TaskHandle { id: task_id, name })
    }

    async fn watchdog_monitor(
        name: String,
        task_id: Uuid,
        mut watchdog_rx: broadcast::Receiver<()>,
        timeout: Duration,
        enable_logging: bool,
    ) {
        let mut interval = interval(timeout);
        let mut last_reset = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let elapsed = last_reset.elapsed();
                    if elapsed >= timeout {
                        warn!(
                            "Watchdog timeout for task '{}' ({}): no heartbeat for {:?}",
                            name, task_id, elapsed
                        );
                    }
                }
                result = watchdog_rx.recv() => {
                    match result {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            if enable_logging {
                                debug!(
                                    "Watchdog reset for task '{}' ({}): {:?} since last reset",
                                    name, task_id, last_reset.elapsed()
                                );
                            }
                            last_reset = tokio::time::Instant::now();
                        }
                        Err(RecvError::Closed) => {
                            debug!("Watchdog for task '{}' ({}) shutting down", name, task_id);
                            break;
                        }
                    }
                }
            }
        }
    }

    pub async fn wait_for_task(
        &self,
        handle: &TaskHandle,
        timeout_duration: Option<Duration>,
    ) -> Result<(), TaskError> {
        let join_handle = {
            let mut task_handles = self.task_handles.write().await;
            task_handles.remove(&handle.id)
        };

        let Some(join_handle) = join_handle else {
            return Err(TaskError::NotFound);
        };

        match timeout_duration {
            Some(dur) => match timeout(dur, join_handle).await {
                Ok(result) => result.map_err(TaskError::JoinError),
                Err(_) => Err(TaskError::Timeout),
            },
            None => join_handle.await.map_err(TaskError::JoinError),
        }
    }

    /// Stop a worker: request a graceful stop when it runs a filter, wait up to
    /// `timeout_duration`, then abort it.
    pub async fn cancel_task(
        &self,
        handle: &TaskHandle,
        timeout_duration: Option<Duration>,
    ) -> Result<(), TaskError> {
        let status = self.filter_status(handle).await;
        let join_handle = {
            let mut task_handles = self.task_handles.write().await;
            task_handles.remove(&handle.id)
        };
        let Some(mut join_handle) = join_handle else {
            return Err(TaskError::NotFound);
        };

        match status {
            Some(status) => {
                status.stop();
                let grace = timeout_duration.unwrap_or(self.config.shutdown_timeout);
                if timeout(grace, &mut join_handle).await.is_err() {
                    warn!("Task '{}' did not stop within {:?}, aborting", handle.name, grace);
                    join_handle.abort();
                    let _ = join_handle.await;
                }
            }
            None => {
                join_handle.abort();
                match timeout_duration {
                    Some(dur) => {
                        if timeout(dur, join_handle).await.is_err() {
                            warn!("Task '{}' did not cancel within timeout", handle.name);
                        }
                    }
                    None => {
                        let _ = join_handle.await;
                    }
                }
            }
        }

        self.tasks.write().await.remove(&handle.id);
        Ok(())
    }

    /// Stop the filter behind `handle` and wait for its worker to finish.
    pub async fn stop_filter(&self, handle: &TaskHandle) -> Result<(), TaskError> {
        self.cancel_task(handle, None).await
    }

    pub async fn wait_for_filter(
        &self,
        handle: &TaskHandle,
        timeout_duration: Option<Duration>,
    ) -> Result<(), TaskError> {
        self.wait_for_task(handle, timeout_duration).await
    }

    async fn filter_status(&self, handle: &TaskHandle) -> Option<Arc<FilterStatus>> {
        let tasks = self.tasks.read().await;
        tasks.get(&handle.id).and_then(|task| task.status.clone())
    }

    pub async fn current_tasks(&self) -> Vec<TaskInfo> {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .map(|task| TaskInfo {
                id: task.id,
                name: task.name.clone(),
                created_at: task.created_at,
                watchdog_enabled: task.enable_watchdog_timers,
                filter_state: task.status.as_ref().map(|s| s.state()),
            })
            .collect()
    }

    /// Stop every filter, wait for the workers, abort the ones that overrun the
    /// shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), TaskError> {
        info!("Shutting down task manager");
        {
            let tasks = self.tasks.read().await;
            for status in tasks.values().filter_map(|task| task.status.as_ref()) {
                status.stop();
            }
        }

        let task_handles: Vec<_> = {
            let mut task_handles = self.task_handles.write().await;
            task_handles.drain().collect()
        };

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for (task_id, mut handle) in task_handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("Task {} did not finish before shutdown timeout, aborting", task_id);
                handle.abort();
            }
        }

        self.tasks.write().await.clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub enable_timers: bool,
    pub enable_logging: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: Uuid,
    pub name: String,
    watchdog_tx: Option<broadcast::Sender<()>>,
}

impl TaskContext {
    pub fn reset_watchdog(&self) {
        if let Some(tx) = &self.watchdog_tx {
            // a send error only means the monitor already exited
            let _ = tx.send(());
        }
    }

    pub fn watchdog_enabled(&self) -> bool {
        self.watchdog_tx.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: Uuid,
    pub name: String,
    pub created_at: Instant,
    pub watchdog_enabled: bool,
    /// Lifecycle state when the task runs a filter.
    pub filter_state: Option<crate::filters::FilterState>,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task timed out")]
    Timeout,
    #[error("Join error: {0}")]
    JoinError(tokio::task::JoinError),
    #[error("Task not found")]
    NotFound,
    #[error("Watchdog timeout must be greater than zero")]
    InvalidWatchdogTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::mockup::{lossy_factory, mock_factory, upstream_queue, CountingTransform};
    use crate::filters::{FilterParams, FilterState};
    use tokio::time::sleep;

    fn source(name: &str, params: FilterParams) -> Filter {
        let mut filter = Filter::new(name, 0, 1, params, lossy_factory(4), CountingTransform::default());
        filter.attach_writer(0).unwrap();
        filter
    }

    #[tokio::test]
    async fn test_basic_task_creation() {
        let manager = TaskManager::new(TaskManagerConfig::default());

        let handle = manager
            .create_task(
                "test_task".to_string(),
                |ctx| async move {
                    debug!("Task {} running", ctx.name);
                    sleep(Duration::from_millis(20)).await;
                },
                None,
            )
            .await
            .unwrap();

        manager.wait_for_task(&handle, None).await.unwrap();
        assert!(matches!(
            manager.wait_for_task(&handle, None).await,
            Err(TaskError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_watchdog_functionality() {
        let config = TaskManagerConfig::new()
            .with_watchdog(Duration::from_millis(100))
            .with_watchdog_logging(true);
        let manager = TaskManager::new(config);

        let handle = manager
            .create_task(
                "watchdog_test".to_string(),
                |ctx| async move {
                    assert!(ctx.watchdog_enabled());
                    for _ in 0..5 {
                        sleep(Duration::from_millis(20)).await;
                        ctx.reset_watchdog();
                    }
                },
                None,
            )
            .await
            .unwrap();

        manager.wait_for_task(&handle, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_watchdog_timeout_is_rejected() {
        let manager = TaskManager::new(TaskManagerConfig::default());
        let filter = source(
            "no-watchdog-period",
            FilterParams::master(Duration::from_millis(5)).with_watchdog_timeout(Duration::ZERO),
        );
        let status = filter.status();

        assert!(matches!(
            manager.spawn_filter(filter).await,
            Err(TaskError::InvalidWatchdogTimeout)
        ));
        assert!(manager.current_tasks().await.is_empty());
        assert_eq!(status.state(), FilterState::Created);

        let manager = TaskManager::new(TaskManagerConfig::new().with_watchdog(Duration::ZERO));
        let result = manager
            .create_task("zero".to_string(), |_ctx| async {}, None)
            .await;
        assert!(matches!(result, Err(TaskError::InvalidWatchdogTimeout)));
    }

    #[tokio::test]
    async fn test_spawn_and_stop_filter() {
        let manager = TaskManager::new(TaskManagerConfig::default());
        let filter = source(
            "paced",
            FilterParams::master(Duration::from_millis(5))
                .with_watchdog_timeout(Duration::from_millis(200)),
        );
        let status = filter.status();

        let handle = manager.spawn_filter(filter).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(status.state(), FilterState::Running);
        assert!(status.stats().cycles > 0);

        let tasks = manager.current_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].filter_state, Some(FilterState::Running));
        assert!(tasks[0].watchdog_enabled);

        manager.stop_filter(&handle).await.unwrap();
        assert_eq!(status.state(), FilterState::Stopped);
        assert!(manager.current_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_stop_is_idempotent() {
        let manager = TaskManager::new(TaskManagerConfig::default());
        let mut filter = Filter::new(
            "waiting",
            1,
            1,
            FilterParams::slave(),
            mock_factory(2),
            CountingTransform::default(),
        );
        filter.attach_reader(0, upstream_queue(2)).unwrap();
        let status = filter.status();
        let handle = manager.spawn_filter(filter).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let stoppers: Vec<_> = (0..4)
            .map(|_| {
                let status = Arc::clone(&status);
                tokio::spawn(async move { status.stop() })
            })
            .collect();
        let mut changed = 0;
        for stopper in stoppers {
            if stopper.await.unwrap() {
                changed += 1;
            }
        }
        assert_eq!(changed, 1);

        manager
            .wait_for_filter(&handle, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(status.state(), FilterState::Stopped);
        assert!(!status.stop());
        assert_eq!(status.state(), FilterState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_filter() {
        let manager = TaskManager::new(TaskManagerConfig::default());
        let mut statuses = Vec::new();
        for i in 0..3 {
            let filter = source(&format!("source-{}", i), FilterParams::master(Duration::from_millis(5)));
            statuses.push(filter.status());
            manager.spawn_filter(filter).await.unwrap();
        }
        sleep(Duration::from_millis(20)).await;

        manager.shutdown().await.unwrap();
        for status in &statuses {
            assert_eq!(status.state(), FilterState::Stopped);
        }
        assert!(manager.current_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_task_cancellation() {
        let manager = TaskManager::new(TaskManagerConfig::default());

        let handle = manager
            .create_task(
                "long_task".to_string(),
                |_ctx| async move {
                    sleep(Duration::from_secs(10)).await;
                },
                None,
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        manager
            .cancel_task(&handle, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(manager.current_tasks().await.is_empty());
    }
}
