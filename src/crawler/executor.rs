//! Concurrency-bounded executor
//!
//! A counting gate of `limit` slots. A slot is taken before a fetch starts and
//! given back once the fetch has finished and the slot's delay has elapsed, so
//! the delay applies per slot rather than globally.

use crate::CrawlError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Permission to run one work item
#[derive(Debug)]
pub struct Slot {
    permit: OwnedSemaphorePermit,
    delay: Duration,
}

impl Slot {
    fn release(self) {
        if self.delay.is_zero() {
            drop(self.permit);
            return;
        }
        let Slot { permit, delay } = self;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(permit);
        });
    }
}

/// Why [`Executor::execute`] stopped early
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// First item failure in fail-fast mode
    Failed(E),
    /// A work item panicked or the gate closed
    Internal(String),
}

impl<E: fmt::Display> fmt::Display for ExecuteError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", e),
            Self::Internal(msg) => write!(f, "executor fault: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    slots: Arc<Semaphore>,
    limit: usize,
    delay: Duration,
}

impl Executor {
    /// Creates a gate with `limit` slots (at least one) and a per-slot delay
    pub fn new(limit: usize, delay: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            delay,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Slots not currently held by a running or cooling-down item
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a free slot
    pub async fn reserve(&self) -> Result<Slot, CrawlError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CrawlError::Internal("executor gate closed".to_string()))?;
        Ok(Slot {
            permit,
            delay: self.delay,
        })
    }

    /// Runs `fut` on `tasks`, returning the slot when it finishes
    ///
    /// The task's output is available immediately; only the slot waits out
    /// the delay.
    pub fn spawn<T, F>(&self, slot: Slot, tasks: &mut JoinSet<T>, fut: F)
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        tasks.spawn(async move {
            let output = fut.await;
            slot.release();
            output
        });
    }

    /// Runs every item through `f` and returns the outcomes in input order
    ///
    /// With `continue_on_error` each item's failure is isolated and shows up
    /// in its own position. Without it, the first failure stops dispatch:
    /// items not yet started are abandoned, in-flight ones are awaited, and
    /// the failure is returned.
    pub async fn execute<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        continue_on_error: bool,
        f: F,
    ) -> Result<Vec<Result<T, E>>, ExecuteError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = items.len();
        let mut outcomes: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();
        let mut pending = items.into_iter().enumerate();
        let mut next = pending.next();
        let mut tasks: JoinSet<(usize, Result<T, E>)> = JoinSet::new();
        let mut abort: Option<ExecuteError<E>> = None;

        loop {
            let can_dispatch = next.is_some() && abort.is_none();
            if !can_dispatch && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((index, Err(e))) if !continue_on_error => {
                            if abort.is_none() {
                                abort = Some(ExecuteError::Failed(e));
                            }
                            tracing::debug!(index, "Item failed, abandoning remaining items");
                        }
                        Ok((index, outcome)) => outcomes[index] = Some(outcome),
                        Err(e) => {
                            if abort.is_none() {
                                abort = Some(ExecuteError::Internal(e.to_string()));
                            }
                        }
                    }
                }

                slot = self.reserve(), if can_dispatch => {
                    let slot = slot.map_err(|e| ExecuteError::Internal(e.to_string()))?;
                    if let Some((index, item)) = next.take() {
                        let fut = f(item);
                        self.spawn(slot, &mut tasks, async move { (index, fut.await) });
                        next = pending.next();
                    }
                }
            }
        }

        if let Some(abort) = abort {
            return Err(abort);
        }

        outcomes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ExecuteError::Internal("work item produced no outcome".to_string()))
    }
}
