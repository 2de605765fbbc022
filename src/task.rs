use std::cell::RefCell;
use tokio_util::sync::CancellationToken;


/// A deferred unit of work submitted to a collection.
pub type Task<T> = Box<dyn FnOnce() -> anyhow::Result<Collected<T>> + Send + 'static>;

/// What a task produced: one value or an ordered run of values.
///
/// The collector flattens `Many` into the result list element by element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Collected<T> {
    pub fn len(&self) -> usize {
        match self {
            Collected::One(_) => 1,
            Collected::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub(crate) fn append_to(self, out: &mut Vec<T>) {
        match self {
            Collected::One(item) => out.push(item),
            Collected::Many(mut items) => out.append(&mut items),
        }
    }
}

impl<T> From<Vec<T>> for Collected<T> {
    fn from(items: Vec<T>) -> Self {
        Collected::Many(items)
    }
}

impl<T> FromIterator<T> for Collected<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Collected::Many(iter.into_iter().collect())
    }
}


thread_local! {
    static CURRENT_TOKEN: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// Returns true when the task running on this thread has been cancelled.
///
/// Worker threads cannot be preempted, so long running tasks should poll this
/// and return early. Outside of a task it always returns false.
pub fn is_cancelled() -> bool {
    CURRENT_TOKEN.with(|token| {
        token
            .borrow()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    })
}

/// The cancellation token of the task running on this thread, if any.
pub fn cancellation_token() -> Option<CancellationToken> {
    CURRENT_TOKEN.with(|token| token.borrow().clone())
}

/// Installs `token` as the current task token until the guard is dropped.
pub(crate) fn enter(token: CancellationToken) -> CurrentTaskGuard {
    let previous = CURRENT_TOKEN.with(|current| current.replace(Some(token)));
    CurrentTaskGuard { previous }
}

pub(crate) struct CurrentTaskGuard {
    previous: Option<CancellationToken>,
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TOKEN.with(|current| *current.borrow_mut() = previous);
    }
}
