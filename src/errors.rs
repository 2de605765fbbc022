use std::io;
use thiserror::Error;


/// Why a task ended up cancelled instead of producing an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The collection deadline elapsed before the task finished.
    TimedOut,
    /// The collector's own wait was interrupted by the caller.
    Interrupted,
    /// The task was dropped or skipped without running to completion.
    Aborted,
}

/// The outcome of a single task that did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {index} failed: {source}")]
    Failed {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("task {index} panicked: {message}")]
    Panicked {
        index: usize,
        message: String,
    },
    #[error("task {index} was cancelled ({reason:?})")]
    Cancelled {
        index: usize,
        reason: CancelReason,
    },
}

impl TaskError {
    /// Submission index of the task this error belongs to.
    pub fn index(&self) -> usize {
        match self {
            TaskError::Failed { index, .. }
            | TaskError::Panicked { index, .. }
            | TaskError::Cancelled { index, .. } => *index,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled { .. })
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            TaskError::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Rejected configuration, reported by the builder setter that received it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid thread name format {format:?}: {reason}")]
    InvalidThreadNameFormat {
        format: String,
        reason: &'static str,
    },
    #[error("thread priority {priority} is outside of [{min}, {max}]")]
    PriorityOutOfRange {
        priority: i32,
        min: i32,
        max: i32,
    },
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("executor has been shut down")]
    Shutdown,
    #[error("executor has no worker threads to run {tasks} task(s)")]
    NoWorkers {
        tasks: usize,
    },
    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("strategy aborted the collection: {0}")]
    Strategy(#[source] anyhow::Error),
    #[error("blocking collect() called from within an async runtime, use collect_async()")]
    NestedRuntime,
    #[error("failed to build the collection runtime")]
    Runtime(#[source] io::Error),
}

impl Error {
    /// Wraps an arbitrary error raised by a custom strategy.
    pub fn strategy<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Error::Strategy(error.into())
    }

    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            Error::Task(error) => Some(error),
            _ => None,
        }
    }

    /// True when the collection was aborted because a task was cancelled or timed out.
    pub fn is_cancellation(&self) -> bool {
        self.task_error().is_some_and(TaskError::is_cancellation)
    }
}
