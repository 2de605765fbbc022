use super::{
    errors::{CancelReason, TaskError},
    task::Collected,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll}
};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;


/// Result of one task: its values, or why it produced none.
pub type Outcome<T> = Result<Collected<T>, TaskError>;


/// Handle to a submitted task with cancellation and outcome retrieval.
pub struct JoinHandle<T> {
    index: usize,
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<Outcome<T>>,
}

impl<T> JoinHandle<T> {

    pub fn new
    (
        index: usize,
        cancel_token: CancellationToken,
        receiver: oneshot::Receiver<Outcome<T>>,
    ) -> Self {
        Self {
            index,
            cancel_token,
            receiver
        }
    }

    /// Submission index of the task.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Takes the outcome if the task has already reported one.
    ///
    /// Returns `None` while the task is still queued or running.
    pub fn try_outcome(&mut self) -> Option<Outcome<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(self.aborted())),
        }
    }

    fn aborted(&self) -> TaskError {
        TaskError::Cancelled { index: self.index, reason: CancelReason::Aborted }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or_else(|_| Err(this.aborted()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
