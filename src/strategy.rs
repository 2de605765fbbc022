//! How a collection reacts to tasks that fail or time out.

use super::errors::{Error, TaskError};


/// Decides what happens to a task error during collection.
///
/// Returning `Ok(())` swallows the error and the collection carries on.
/// Returning `Err` aborts the collection with that error.
pub trait ExceptionStrategy: Send + Sync {
    fn handle(&self, error: TaskError) -> Result<(), Error>;
}

impl<F> ExceptionStrategy for F
where
    F: Fn(TaskError) -> Result<(), Error> + Send + Sync,
{
    fn handle(&self, error: TaskError) -> Result<(), Error> {
        self(error)
    }
}

/// Swallows every error. The default for both failures and timeouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Quiet;

impl ExceptionStrategy for Quiet {
    fn handle(&self, error: TaskError) -> Result<(), Error> {
        tracing::trace!(task = error.index(), "ignoring task error: {error}");
        Ok(())
    }
}

/// Re-raises the task error, aborting the collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl ExceptionStrategy for FailFast {
    fn handle(&self, error: TaskError) -> Result<(), Error> {
        Err(Error::Task(error))
    }
}
