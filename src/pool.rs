use super::{
    errors::{CancelReason, PoolError, TaskError},
    handle::{JoinHandle, Outcome},
    model::{PoolMetrics, WaitStatus},
    task::{self, Task},
    thread::{DefaultThreadFactory, ThreadFactory},
};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    thread,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tokio::{
    sync::{oneshot, Notify},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};


/// Unit of work accepted by an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool that runs jobs on its own threads.
///
/// Batch submission, bounded waiting and outcome retrieval are layered on top
/// of `execute` by [`Batch`], so any executor can back a collection.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> Result<(), PoolError>;

    fn num_threads(&self) -> usize;

    /// Stops accepting jobs. Jobs already queued still run.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}


/// Конфигурация пула потоков
#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: usize,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            stack_size: None,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            num_threads: num_cpus::get(),
            stack_size: None,
        }
    }
}


/// Used to create a new [`ThreadPool`].
pub struct ThreadPoolBuilder {
    config: Config,
    factory: Option<Arc<dyn ThreadFactory>>,
}

impl ThreadPoolBuilder {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            factory: None,
        }
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    /// Stack size for workers whose factory did not choose one.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.config.stack_size = Some(stack_size);
        self
    }

    pub fn thread_factory<F>(mut self, factory: F) -> Self
    where
        F: ThreadFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Starts all worker threads and returns the pool.
    pub fn build(self) -> Result<ThreadPool, PoolError> {
        let Self { config, factory } = self;
        let factory: Arc<dyn ThreadFactory> = match factory {
            Some(factory) => factory,
            None => Arc::new(DefaultThreadFactory::new()),
        };

        let (sender, receiver) = channel::unbounded();
        let (alive, terminated) = channel::bounded::<()>(0);
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::new();
        for _ in 0..config.num_threads {
            let receiver = receiver.clone();
            let counters = counters.clone();
            let alive = alive.clone();

            let mut worker = factory.new_thread(Box::new(move || {
                worker_loop(receiver, counters, alive);
            }));
            if let (None, Some(stack_size)) = (worker.stack_size(), config.stack_size) {
                worker.set_stack_size(stack_size);
            }

            let daemon = worker.is_daemon();
            let name = worker.name().map(str::to_owned);
            match worker.start() {
                // Daemon workers are detached right away.
                Ok(handle) if !daemon => workers.push(handle),
                Ok(_) => {}
                Err(err) => {
                    error!(
                        error = &err as &dyn std::error::Error,
                        "failed to spawn worker thread {name:?}"
                    );
                    // Started workers exit once the job channel disconnects.
                    return Err(PoolError::Spawn(err));
                }
            }
        }
        drop(alive);

        debug!(num_threads = config.num_threads, "worker pool started");

        Ok(Arc::new(ThreadPoolInner {
            sender,
            shutdown: RwLock::new(false),
            num_threads: config.num_threads,
            workers: Mutex::new(workers),
            terminated,
            counters,
        }))
    }
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}


enum Message {
    Run(Job),
    Terminate,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

pub type ThreadPool = Arc<ThreadPoolInner>;

/// Пул OS-потоков фиксированного размера с одной FIFO очередью
pub struct ThreadPoolInner {
    sender: Sender<Message>,
    shutdown: RwLock<bool>,
    num_threads: usize,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    terminated: Receiver<()>,
    counters: Arc<Counters>,
}

impl ThreadPoolInner {
    pub fn new(num_threads: usize) -> Result<ThreadPool, PoolError> {
        ThreadPoolBuilder::new().num_threads(num_threads).build()
    }

    pub fn with_config(config: Config) -> Result<ThreadPool, PoolError> {
        ThreadPoolBuilder::with_config(config).build()
    }

    pub fn execute(&self, job: Job) -> Result<(), PoolError> {
        // Держим read lock до отправки, чтобы shutdown не вклинился между проверкой и send
        let shutdown = self.shutdown.read().unwrap_or_else(PoisonError::into_inner);
        if *shutdown {
            return Err(PoolError::Shutdown);
        }

        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(Message::Run(job)).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(PoolError::Shutdown);
        }
        Ok(())
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn shutdown(&self) {
        let mut shutdown = self.shutdown.write().unwrap_or_else(PoisonError::into_inner);
        if *shutdown {
            return;
        }
        *shutdown = true;

        // Сначала выполняются задачи из очереди, потом каждый воркер берет свой Terminate
        for _ in 0..self.num_threads {
            let _ = self.sender.send(Message::Terminate);
        }
        debug!(num_threads = self.num_threads, "worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until every worker thread has exited, joining the non-daemon ones.
    ///
    /// Returns false if workers are still running when `timeout` elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        match self.terminated.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {}
            Ok(()) | Err(RecvTimeoutError::Timeout) => return false,
        }

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            let _ = worker.join();
        }
        true
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.num_threads,
            active_tasks: self.counters.active.load(Ordering::Relaxed),
            queued_tasks: self.counters.queued.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            panicked_tasks: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Executor for ThreadPoolInner {
    fn execute(&self, job: Job) -> Result<(), PoolError> {
        ThreadPoolInner::execute(self, job)
    }

    fn num_threads(&self) -> usize {
        ThreadPoolInner::num_threads(self)
    }

    fn shutdown(&self) {
        ThreadPoolInner::shutdown(self)
    }

    fn is_shutdown(&self) -> bool {
        ThreadPoolInner::is_shutdown(self)
    }
}

fn worker_loop(receiver: Receiver<Message>, counters: Arc<Counters>, _alive: Sender<()>) {
    trace!(worker = ?thread::current().name(), "worker started");

    while let Ok(message) = receiver.recv() {
        let job = match message {
            Message::Run(job) => job,
            Message::Terminate => break,
        };

        counters.queued.fetch_sub(1, Ordering::Relaxed);
        counters.active.fetch_add(1, Ordering::Relaxed);
        // Паника задачи не должна убивать воркер
        let result = panic::catch_unwind(AssertUnwindSafe(job));
        counters.active.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(()) => counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => counters.panicked.fetch_add(1, Ordering::Relaxed),
        };
    }

    trace!(worker = ?thread::current().name(), "worker exited");
}


/// One submission batch of a collection.
///
/// Tracks how many of its tasks are still pending so the collector can wait
/// for all of them at once, optionally bounded by a deadline.
pub struct Batch {
    counter: Arc<AtomicUsize>,
    notify: Arc<Notify>,
    executor: Arc<dyn Executor>,
}

impl Batch {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
            executor,
        }
    }

    /// Submits `task` as the `index`-th task of this batch.
    pub fn spawn<T>(&self, index: usize, task: Task<T>) -> Result<JoinHandle<T>, PoolError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Outcome<T>>();
        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();

        self.counter.fetch_add(1, Ordering::AcqRel);

        let counter = self.counter.clone();
        let notify = self.notify.clone();

        let job: Job = Box::new(move || {
            let outcome = if cancel_clone.is_cancelled() {
                Err(TaskError::Cancelled { index, reason: CancelReason::Aborted })
            } else {
                let _current = task::enter(cancel_clone);
                run_task(index, task)
            };

            let _ = tx.send(outcome);

            if counter.fetch_sub(1, Ordering::AcqRel) == 1 {
                notify.notify_one();
            }
        });

        if let Err(err) = self.executor.execute(job) {
            // Job дропнут без выполнения
            if self.counter.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.notify.notify_one();
            }
            return Err(err);
        }
        trace!(task = index, "task submitted");

        Ok(JoinHandle::new(index, cancel_token, rx))
    }

    /// Number of submitted tasks that have not reported an outcome yet.
    pub fn pending(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        while self.counter.load(Ordering::Acquire) > 0 {
            self.notify.notified().await;
        }
    }

    /// Waits for every task, until `deadline` if one is given, or until
    /// `interrupt` is cancelled.
    pub async fn wait_until(
        &self,
        deadline: Option<Instant>,
        interrupt: &CancellationToken,
    ) -> WaitStatus {
        let all_done = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.wait()).await.is_ok(),
                None => {
                    self.wait().await;
                    true
                }
            }
        };

        tokio::select! {
            biased;
            done = all_done => if done { WaitStatus::Completed } else { WaitStatus::TimedOut },
            _ = interrupt.cancelled() => WaitStatus::Interrupted,
        }
    }
}

fn run_task<T>(index: usize, task: Task<T>) -> Outcome<T> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(collected)) => Ok(collected),
        Ok(Err(source)) => Err(TaskError::Failed { index, source }),
        Err(payload) => Err(TaskError::Panicked {
            index,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
