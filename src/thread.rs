//! Worker thread creation.
//!
//! A pool asks its [`ThreadFactory`] for an unstarted [`WorkerThread`] per
//! worker. Factories can be stacked: [`TunedThreadFactory`] wraps a base
//! factory and renames, detaches or reprioritizes whatever the base produced.

use super::errors::ConfigError;
use std::{
    fmt,
    io,
    mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};


/// Body of a worker thread.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;


/// Scheduling priority of a worker thread, from [`Priority::MIN`] to [`Priority::MAX`].
///
/// On Unix the priority is applied as the nice value `NORM - priority`, so
/// anything above [`Priority::NORM`] usually needs elevated privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(i32);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const NORM: Priority = Priority(5);
    pub const MAX: Priority = Priority(10);

    pub fn new(value: i32) -> Result<Self, ConfigError> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            return Err(ConfigError::PriorityOutOfRange {
                priority: value,
                min: Self::MIN.0,
                max: Self::MAX.0,
            });
        }
        Ok(Priority(value))
    }

    #[inline]
    pub fn get(self) -> i32 {
        self.0
    }

    #[inline]
    fn nice_value(self) -> i32 {
        Self::NORM.0 - self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORM
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Index,
}

/// Thread name pattern where every `{}` is replaced with the worker counter.
///
/// `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNameFormat {
    pieces: Vec<Piece>,
}

impl ThreadNameFormat {
    pub fn parse(format: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidThreadNameFormat {
            format: format.to_owned(),
            reason,
        };

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = format.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => match chars.next() {
                    Some('{') => literal.push('{'),
                    Some('}') => {
                        if !literal.is_empty() {
                            pieces.push(Piece::Literal(mem::take(&mut literal)));
                        }
                        pieces.push(Piece::Index);
                    }
                    _ => return Err(invalid("expected `{}` or `{{`")),
                },
                '}' => match chars.next() {
                    Some('}') => literal.push('}'),
                    _ => return Err(invalid("unmatched `}`")),
                },
                '\0' => return Err(invalid("thread names may not contain NUL bytes")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        let parsed = Self { pieces };
        if parsed.format(0).is_empty() {
            return Err(invalid("format produces an empty name"));
        }
        Ok(parsed)
    }

    pub fn format(&self, index: usize) -> String {
        let mut name = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => name.push_str(text),
                Piece::Index => name.push_str(&index.to_string()),
            }
        }
        name
    }

}


/// A worker thread that has not been started yet.
///
/// Name, daemon flag, priority and stack size can all be changed up to the
/// call to [`WorkerThread::start`].
pub struct WorkerThread {
    name: Option<String>,
    daemon: bool,
    priority: Option<Priority>,
    stack_size: Option<usize>,
    run: Runnable,
}

impl WorkerThread {
    pub fn new(run: Runnable) -> Self {
        Self {
            name: None,
            daemon: false,
            priority: None,
            stack_size: None,
            run,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Daemon threads are detached: the pool never joins them.
    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub fn set_daemon(&mut self, daemon: bool) {
        self.daemon = daemon;
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = Some(priority);
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub fn set_stack_size(&mut self, stack_size: usize) {
        self.stack_size = Some(stack_size);
    }

    pub fn start(self) -> io::Result<thread::JoinHandle<()>> {
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let priority = self.priority;
        let run = self.run;
        builder.spawn(move || {
            if let Some(priority) = priority {
                set_current_thread_priority(priority);
            }
            run()
        })
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("daemon", &self.daemon)
            .field("priority", &self.priority)
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}


/// Creates the threads of a worker pool.
pub trait ThreadFactory: Send + Sync {
    fn new_thread(&self, run: Runnable) -> WorkerThread;
}

impl<F> ThreadFactory for F
where
    F: Fn(Runnable) -> WorkerThread + Send + Sync,
{
    fn new_thread(&self, run: Runnable) -> WorkerThread {
        self(run)
    }
}

static POOL_NUMBER: AtomicUsize = AtomicUsize::new(1);

/// Names threads `lemming-pool-{pool}-thread-{n}`, both counters starting at 1.
#[derive(Debug)]
pub struct DefaultThreadFactory {
    prefix: String,
    thread_number: AtomicUsize,
}

impl DefaultThreadFactory {
    pub fn new() -> Self {
        let pool = POOL_NUMBER.fetch_add(1, Ordering::Relaxed);
        Self {
            prefix: format!("lemming-pool-{pool}-thread-"),
            thread_number: AtomicUsize::new(1),
        }
    }
}

impl Default for DefaultThreadFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn new_thread(&self, run: Runnable) -> WorkerThread {
        let n = self.thread_number.fetch_add(1, Ordering::Relaxed);
        let mut worker = WorkerThread::new(run);
        worker.set_name(format!("{}{}", self.prefix, n));
        worker
    }
}


/// Wraps a base factory and applies only the tuning that was explicitly set.
pub struct TunedThreadFactory {
    base: Arc<dyn ThreadFactory>,
    name_format: Option<ThreadNameFormat>,
    daemon: Option<bool>,
    priority: Option<Priority>,
    counter: AtomicUsize,
}

impl TunedThreadFactory {
    pub fn new(base: Arc<dyn ThreadFactory>) -> Self {
        Self {
            base,
            name_format: None,
            daemon: None,
            priority: None,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn name_format(mut self, name_format: Option<ThreadNameFormat>) -> Self {
        self.name_format = name_format;
        self
    }

    pub fn daemon(mut self, daemon: Option<bool>) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }
}

impl ThreadFactory for TunedThreadFactory {
    fn new_thread(&self, run: Runnable) -> WorkerThread {
        let mut worker = self.base.new_thread(run);
        if let Some(format) = &self.name_format {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            worker.set_name(format.format(n));
        }
        if let Some(daemon) = self.daemon {
            worker.set_daemon(daemon);
        }
        if let Some(priority) = self.priority {
            worker.set_priority(priority);
        }
        worker
    }
}


#[cfg(unix)]
fn set_current_thread_priority(priority: Priority) {
    // On Linux `PRIO_PROCESS` with id 0 targets the calling thread only.
    let nice = priority.nice_value();
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) } != 0 {
        let error = io::Error::last_os_error();
        tracing::warn!(
            error = &error as &dyn std::error::Error,
            "failed to set thread priority {} (nice {nice})",
            priority.get()
        );
    }
}

#[cfg(not(unix))]
fn set_current_thread_priority(_priority: Priority) {
    // Ignored for non-Unix platforms.
}
