//! Pullable task sources.
//!
//! A runner never asks a source for a task until it holds the capacity to run
//! it, so work produced by a lazy source (and any side effect of producing it)
//! is materialized one task at a time, just before launch.

use std::collections::VecDeque;

use crate::core::{Task, TaskPoolError};

/// Sequence of tasks consumed by a [`TaskPoolRunner`](crate::core::TaskPoolRunner).
pub trait TaskSource<T>: Send {
    /// Take the next task.
    ///
    /// `Ok(None)` means the source is exhausted.
    ///
    /// # Errors
    ///
    /// An error means the source could not produce its next task. The runner
    /// treats it as a run-level failure and stops pulling.
    fn pull(&mut self) -> Result<Option<Task<T>>, TaskPoolError>;

    /// Whether another task may be available. Must not materialize the task.
    ///
    /// Lazy sources answer `true` until a `pull` has observed the end.
    fn peek(&self) -> bool;

    /// Whether the source is known to be exhausted.
    fn is_exhausted(&self) -> bool {
        !self.peek()
    }
}

impl<T, S> TaskSource<T> for Box<S>
where
    S: TaskSource<T> + ?Sized,
{
    fn pull(&mut self) -> Result<Option<Task<T>>, TaskPoolError> {
        (**self).pull()
    }

    fn peek(&self) -> bool {
        (**self).peek()
    }
}

/// Fixed, pre-built list of tasks, consumed in order.
pub struct ListSource<T> {
    tasks: VecDeque<Task<T>>,
}

impl<T> ListSource<T> {
    /// Source over the given tasks.
    pub fn new(tasks: impl IntoIterator<Item = Task<T>>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    /// Tasks not yet pulled.
    pub fn remaining(&self) -> usize {
        self.tasks.len()
    }
}

impl<T: Send> TaskSource<T> for ListSource<T> {
    fn pull(&mut self) -> Result<Option<Task<T>>, TaskPoolError> {
        Ok(self.tasks.pop_front())
    }

    fn peek(&self) -> bool {
        !self.tasks.is_empty()
    }
}

/// Lazily evaluated source backed by a fallible iterator.
///
/// The iterator is advanced only by `pull`. The first `None` or `Err` ends the
/// source for good.
pub struct IterSource<I> {
    iter: I,
    done: bool,
}

impl<I> IterSource<I> {
    /// Source over a fallible iterator of tasks.
    pub const fn new(iter: I) -> Self {
        Self { iter, done: false }
    }
}

impl<F> IterSource<std::iter::FromFn<F>> {
    /// Source driven by a generator closure, called once per pull.
    pub fn from_fn<T>(generator: F) -> Self
    where
        F: FnMut() -> Option<Result<Task<T>, TaskPoolError>>,
    {
        Self::new(std::iter::from_fn(generator))
    }
}

impl<T, I> TaskSource<T> for IterSource<I>
where
    I: Iterator<Item = Result<Task<T>, TaskPoolError>> + Send,
{
    fn pull(&mut self) -> Result<Option<Task<T>>, TaskPoolError> {
        if self.done {
            return Ok(None);
        }
        match self.iter.next() {
            Some(Ok(task)) => Ok(Some(task)),
            Some(Err(err)) => {
                self.done = true;
                Err(err)
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn peek(&self) -> bool {
        !self.done
    }
}
