use super::{
    errors::{CancelReason, ConfigError, Error, PoolError, TaskError},
    handle::Outcome,
    model::{CollectMetrics, WaitStatus},
    pool::{Batch, Executor, ThreadPoolBuilder},
    strategy::{ExceptionStrategy, FailFast, Quiet},
    task::{Collected, Task},
    thread::{DefaultThreadFactory, Priority, ThreadFactory, ThreadNameFormat, TunedThreadFactory},
};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;


/// Runs a batch of tasks concurrently and collects their results into one list.
///
/// Every option is optional and only resolved when [`Lemming::collect`] runs,
/// so later calls override earlier ones. Collecting consumes the builder.
///
/// ```no_run
/// let results = lemming::Lemming::new()
///     .add(|| Ok("A".to_owned()))
///     .add_many(|| Ok(vec!["B".to_owned(), "C".to_owned()]))
///     .timeout_ms(500)
///     .collect()?;
/// assert_eq!(results, ["A", "B", "C"]);
/// # Ok::<(), lemming::Error>(())
/// ```
pub struct Lemming<T> {
    tasks: Vec<Task<T>>,
    executor: Option<Arc<dyn Executor>>,
    shutdown_executor: Option<bool>,
    timeout: Option<Duration>,
    thread_count: Option<usize>,
    thread_name_format: Option<ThreadNameFormat>,
    daemon: Option<bool>,
    priority: Option<Priority>,
    thread_factory: Option<Arc<dyn ThreadFactory>>,
    exception_strategy: Option<Arc<dyn ExceptionStrategy>>,
    timeout_strategy: Option<Arc<dyn ExceptionStrategy>>,
    interrupt: Option<CancellationToken>,
}

impl<T> Default for Lemming<T> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            executor: None,
            shutdown_executor: None,
            timeout: None,
            thread_count: None,
            thread_name_format: None,
            daemon: None,
            priority: None,
            thread_factory: None,
            exception_strategy: None,
            timeout_strategy: None,
            interrupt: None,
        }
    }
}

impl<T> Lemming<T>
where
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task producing a single value.
    pub fn add<F>(self, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.add_task(move || f().map(Collected::One))
    }

    /// Adds a task producing a sequence; each element is collected on its own.
    pub fn add_many<F, I>(self, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<I> + Send + 'static,
        I: IntoIterator<Item = T>,
    {
        self.add_task(move || f().map(|items| items.into_iter().collect()))
    }

    /// Adds a task that decides at runtime whether it yields one value or many.
    pub fn add_task<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Collected<T>> + Send + 'static,
    {
        self.tasks.push(Box::new(f));
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Bounds the wait for all tasks. Without it the collection waits indefinitely.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    /// Worker count of the internally created pool. Defaults to one per task.
    pub fn thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = Some(thread_count);
        self
    }

    /// Runs the tasks on a caller-owned executor.
    ///
    /// The executor is not shut down after collection unless
    /// [`Lemming::shutdown_executor`] says otherwise. Thread count and every
    /// thread tuning option are ignored.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn shutdown_executor(mut self, shutdown: bool) -> Self {
        self.shutdown_executor = Some(shutdown);
        self
    }

    /// Names worker threads, `{}` being replaced with 0, 1, 2, ...
    pub fn thread_name_format(mut self, format: &str) -> Result<Self, ConfigError> {
        self.thread_name_format = Some(ThreadNameFormat::parse(format)?);
        Ok(self)
    }

    /// Detaches worker threads of the owned pool.
    ///
    /// Collection behaves the same either way and the process does not wait
    /// for any worker on exit. The flag only decides whether
    /// [`ThreadPoolInner::await_termination`](crate::pool::ThreadPoolInner::await_termination)
    /// joins a worker after it exits.
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Worker thread priority, between [`Priority::MIN`] and [`Priority::MAX`].
    pub fn priority(mut self, priority: i32) -> Result<Self, ConfigError> {
        self.priority = Some(Priority::new(priority)?);
        Ok(self)
    }

    /// Base factory for worker threads. Name format, daemon flag and priority
    /// are still applied on top of what it produces.
    pub fn thread_factory<F>(mut self, factory: F) -> Self
    where
        F: ThreadFactory + 'static,
    {
        self.thread_factory = Some(Arc::new(factory));
        self
    }

    pub fn exception_strategy<S>(mut self, strategy: S) -> Self
    where
        S: ExceptionStrategy + 'static,
    {
        self.exception_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn fail_on_any_exception(self) -> Self {
        self.exception_strategy(FailFast)
    }

    pub fn quietly_handle_all_exceptions(self) -> Self {
        self.exception_strategy(Quiet)
    }

    pub fn timeout_strategy<S>(mut self, strategy: S) -> Self
    where
        S: ExceptionStrategy + 'static,
    {
        self.timeout_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn fail_on_any_timeout(self) -> Self {
        self.timeout_strategy(FailFast)
    }

    pub fn quietly_handle_all_timeouts(self) -> Self {
        self.timeout_strategy(Quiet)
    }

    /// Cancelling `token` interrupts the wait. Unfinished tasks are then
    /// cancelled and reported to the timeout strategy as
    /// [`CancelReason::Interrupted`].
    pub fn interrupt_on(mut self, token: CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    /// Runs every task and blocks until all are done or the timeout elapses.
    ///
    /// Must not be called from inside a Tokio runtime, use
    /// [`Lemming::collect_async`] there.
    pub fn collect(self) -> Result<Vec<T>, Error> {
        self.collect_with_metrics().map(|(results, _)| results)
    }

    pub fn collect_with_metrics(self) -> Result<(Vec<T>, CollectMetrics), Error> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::NestedRuntime);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(self.run())
    }

    pub async fn collect_async(self) -> Result<Vec<T>, Error> {
        self.run().await.map(|(results, _)| results)
    }

    pub async fn collect_with_metrics_async(self) -> Result<(Vec<T>, CollectMetrics), Error> {
        self.run().await
    }

    async fn run(self) -> Result<(Vec<T>, CollectMetrics), Error> {
        let Lemming {
            tasks,
            executor,
            shutdown_executor,
            timeout,
            thread_count,
            thread_name_format,
            daemon,
            priority,
            thread_factory,
            exception_strategy,
            timeout_strategy,
            interrupt,
        } = self;

        let owned = executor.is_none();
        let shutdown = shutdown_executor.unwrap_or(owned);

        let executor = match executor {
            Some(executor) => {
                let tuned = thread_count.is_some()
                    || thread_name_format.is_some()
                    || daemon.is_some()
                    || priority.is_some()
                    || thread_factory.is_some();
                if tuned {
                    debug!("external executor supplied, ignoring thread configuration");
                }
                executor
            }
            None => {
                let base: Arc<dyn ThreadFactory> = match thread_factory {
                    Some(factory) => factory,
                    None => Arc::new(DefaultThreadFactory::new()),
                };
                let factory = TunedThreadFactory::new(base)
                    .name_format(thread_name_format)
                    .daemon(daemon)
                    .priority(priority);
                provision(thread_count.unwrap_or(tasks.len()), factory)?
            }
        };

        // Dropped on every exit path below.
        let mut cleanup = Cleanup {
            executor: executor.clone(),
            shutdown,
            tokens: Vec::with_capacity(tasks.len()),
        };

        if !tasks.is_empty() && executor.num_threads() == 0 {
            return Err(PoolError::NoWorkers { tasks: tasks.len() }.into());
        }

        let quiet: Arc<dyn ExceptionStrategy> = Arc::new(Quiet);
        let exception_strategy = exception_strategy.unwrap_or_else(|| quiet.clone());
        let timeout_strategy = timeout_strategy.unwrap_or(quiet);
        let interrupt = interrupt.unwrap_or_default();
        // A bound too far out to represent waits as if unbounded.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let batch = Batch::new(executor);
        let mut handles = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let handle = batch.spawn(index, task)?;
            cleanup.tokens.push(handle.cancel_token());
            handles.push(handle);
        }

        let status = batch.wait_until(deadline, &interrupt).await;
        let reason = match status {
            // Every handle already holds an outcome.
            WaitStatus::Completed => CancelReason::Aborted,
            WaitStatus::TimedOut => {
                debug!(unfinished = batch.pending(), "collection deadline elapsed");
                CancelReason::TimedOut
            }
            WaitStatus::Interrupted => {
                debug!(unfinished = batch.pending(), "collection interrupted");
                CancelReason::Interrupted
            }
        };

        // Unfinished tasks are cancelled before any strategy runs.
        let outcomes: Vec<Outcome<T>> = handles
            .iter_mut()
            .map(|handle| {
                handle.try_outcome().unwrap_or_else(|| {
                    handle.cancel();
                    Err(TaskError::Cancelled { index: handle.index(), reason })
                })
            })
            .collect();

        let mut results = Vec::new();
        let mut metrics = CollectMetrics::default();
        for outcome in outcomes {
            match outcome {
                Ok(collected) => {
                    metrics.succeeded += 1;
                    collected.append_to(&mut results);
                }
                Err(error) if error.is_cancellation() => {
                    metrics.cancelled += 1;
                    timeout_strategy.handle(error)?;
                }
                Err(error) => {
                    metrics.failed += 1;
                    exception_strategy.handle(error)?;
                }
            }
        }

        drop(cleanup);
        Ok((results, metrics))
    }
}

/// Creates the pool owned by a single collection.
fn provision(num_threads: usize, factory: TunedThreadFactory) -> Result<Arc<dyn Executor>, PoolError> {
    debug!(num_threads, "provisioning collection pool");
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_factory(factory)
        .build()?;
    Ok(pool)
}

/// Cancels every submitted task and shuts down the executor if the
/// collection owns it.
struct Cleanup {
    executor: Arc<dyn Executor>,
    shutdown: bool,
    tokens: Vec<CancellationToken>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        for token in &self.tokens {
            token.cancel();
        }
        if self.shutdown {
            self.executor.shutdown();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ThreadPoolInner;
    use std::{sync::Mutex, thread};

    #[test]
    fn test_options_resolve_at_collection_time() {
        let lemming = Lemming::<u8>::new()
            .fail_on_any_exception()
            .quietly_handle_all_exceptions()
            .add(|| Err(anyhow::anyhow!("ignored")));
        assert_eq!(lemming.task_count(), 1);
        assert!(lemming.collect().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_configuration_fails_immediately() {
        let error = Lemming::<u8>::new().priority(0).err().unwrap();
        assert!(matches!(error, ConfigError::PriorityOutOfRange { .. }));

        let error = Lemming::<u8>::new().thread_name_format("w-{x}").err().unwrap();
        assert!(matches!(error, ConfigError::InvalidThreadNameFormat { .. }));
    }

    #[test]
    fn test_zero_threads_reports_no_workers() {
        let error = Lemming::new()
            .thread_count(0)
            .add(|| Ok(1))
            .collect()
            .unwrap_err();
        assert!(matches!(error, Error::Pool(PoolError::NoWorkers { tasks: 1 })));
    }

    #[test]
    fn test_strategy_error_still_cleans_up() {
        let pool = ThreadPoolInner::new(2).unwrap();
        let error = Lemming::new()
            .executor(pool.clone())
            .shutdown_executor(true)
            .fail_on_any_exception()
            .add(|| Err(anyhow::anyhow!("first")))
            .add(|| Ok(2))
            .collect()
            .unwrap_err();

        assert_eq!(error.task_error().map(TaskError::index), Some(0));
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_factory_and_tuning_chain() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let seen = names.clone();
        let factory = move |run: crate::thread::Runnable| {
            seen.lock().unwrap().push("base");
            crate::thread::WorkerThread::new(run)
        };

        let results = Lemming::new()
            .thread_factory(factory)
            .thread_name_format("tuned-{}")
            .unwrap()
            .daemon(true)
            .add(|| Ok(thread::current().name().map(str::to_owned)))
            .collect()
            .unwrap();

        assert_eq!(results, vec![Some("tuned-0".to_owned())]);
        assert_eq!(*names.lock().unwrap(), vec!["base"]);
    }

    #[test]
    fn test_unrepresentable_timeout_waits_unbounded() {
        let results = Lemming::new()
            .add(|| Ok(1))
            .add_many(|| Ok(vec![2, 3]))
            .timeout(Duration::MAX)
            .fail_on_any_timeout()
            .collect()
            .unwrap();
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[test]
    fn test_daemon_workers_collect_like_joined_ones() {
        for daemon in [true, false] {
            let (results, metrics) = Lemming::new()
                .daemon(daemon)
                .thread_count(2)
                .add(|| Ok(1))
                .add(|| Ok(2))
                .add(|| Err(anyhow::anyhow!("failed")))
                .collect_with_metrics()
                .unwrap();
            assert_eq!(results, vec![1, 2]);
            assert_eq!(metrics, CollectMetrics { succeeded: 2, failed: 1, cancelled: 0 });
        }
    }

    #[tokio::test]
    async fn test_blocking_collect_inside_runtime_is_rejected() {
        let error = Lemming::<u8>::new().collect().unwrap_err();
        assert!(matches!(error, Error::NestedRuntime));
    }

    #[tokio::test]
    async fn test_collect_async_merges_in_submission_order() {
        let results = Lemming::new()
            .add(|| {
                thread::sleep(Duration::from_millis(30));
                Ok(0)
            })
            .add_many(|| Ok(vec![1, 2]))
            .add_task(|| Ok(Collected::One(3)))
            .collect_async()
            .await
            .unwrap();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }
}
