//! Bounded-concurrency batch execution.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::debug;

// == Run Bounded ==
/// Runs every task with at most `concurrency` in flight at once.
///
/// A new task starts as soon as any running task finishes. `result[i]` is
/// the outcome of `tasks[i]`; a failing task never drops or aborts its
/// siblings. A `concurrency` of 0 is treated as 1.
pub async fn run_bounded<T, E, F, Fut>(tasks: Vec<F>, concurrency: usize) -> Vec<Result<T, E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = tasks.len();
    let width = concurrency.max(1);
    debug!(tasks = total, concurrency = width, "Running bounded batch");

    let mut slots: Vec<Option<Result<T, E>>> = std::iter::repeat_with(|| None).take(total).collect();

    // buffer_unordered frees a slot on every completion, unlike buffered,
    // which waits for the head of the queue.
    let mut finished = stream::iter(tasks.into_iter().enumerate())
        .map(|(index, task)| async move { (index, task().await) })
        .buffer_unordered(width);

    while let Some((index, outcome)) = finished.next().await {
        slots[index] = Some(outcome);
    }

    slots.into_iter().flatten().collect()
}

// == Concurrency Limiter ==
/// Reusable width for [`run_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimiter {
    concurrency: usize,
}

impl ConcurrencyLimiter {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<T, E, F, Fut>(&self, tasks: Vec<F>) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        run_bounded(tasks, self.concurrency).await
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(4)
    }
}
