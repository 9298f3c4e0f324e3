//! Bounded-concurrency fan-out.
//!
//! Runs a caller-supplied async function over a batch of items with at most
//! `concurrency` in flight, preserving input order in the results. The
//! stop-on-error variant cancels all in-flight work on the first failure;
//! the settled variant reports every item's outcome.

use crate::orchestrator::Orchestrator;
use relay_core::{CancelKind, CancelToken, RelayError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Options for [`Orchestrator::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    /// Maximum items in flight; at least 1.
    pub concurrency: usize,
}

impl MapOptions {
    /// Options with the given concurrency cap.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }
}

type Joined<R> = std::result::Result<(usize, Result<R>), tokio::task::JoinError>;

enum Step<R> {
    Canceled(CancelKind),
    Joined(Option<Joined<R>>),
}

impl Orchestrator {
    /// Apply `f` to every item with bounded concurrency, stopping on the
    /// first error.
    ///
    /// # Errors
    /// The first item error cancels all in-flight work and is returned;
    /// completed results are discarded.
    pub async fn map<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        f: F,
        options: MapOptions,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.map_with(items, f, options, CancelToken::new()).await
    }

    /// Stop-on-error fan-out under the caller's cancellation scope.
    ///
    /// # Errors
    /// See [`Orchestrator::map`].
    pub async fn map_with<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        f: F,
        options: MapOptions,
        cancel: CancelToken,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        let mut set = spawn_workers(items, f, options, &cancel);

        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        loop {
            let step = next_step(&cancel, &mut set).await;
            match step {
                Step::Canceled(kind) => {
                    set.abort_all();
                    return Err(RelayError::from_cancel(kind));
                }
                Step::Joined(None) => break,
                Step::Joined(Some(Ok((index, Ok(value))))) => {
                    results[index] = Some(value);
                }
                Step::Joined(Some(Ok((_, Err(error))))) => {
                    set.abort_all();
                    return Err(error);
                }
                Step::Joined(Some(Err(join_error))) => {
                    set.abort_all();
                    return Err(RelayError::config(format!(
                        "map worker terminated abnormally: {join_error}"
                    )));
                }
            }
        }

        let mut ordered = Vec::with_capacity(total);
        for result in results {
            match result {
                Some(value) => ordered.push(value),
                None => {
                    return Err(RelayError::config("map worker produced no result"));
                }
            }
        }
        Ok(ordered)
    }

    /// Apply `f` to every item with bounded concurrency, reporting each
    /// item's outcome in input order instead of stopping on error.
    ///
    /// Caller cancellation marks unfinished items as `Canceled`.
    pub async fn map_settled<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        f: F,
        options: MapOptions,
        cancel: CancelToken,
    ) -> Vec<Result<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = items.len();
        let mut set = spawn_workers(items, f, options, &cancel);

        let mut results: Vec<Option<Result<R>>> = (0..total).map(|_| None).collect();
        loop {
            let step = next_step(&cancel, &mut set).await;
            match step {
                Step::Canceled(kind) => {
                    set.abort_all();
                    for slot in results.iter_mut().filter(|slot| slot.is_none()) {
                        *slot = Some(Err(RelayError::from_cancel(kind)));
                    }
                    break;
                }
                Step::Joined(None) => break,
                Step::Joined(Some(Ok((index, outcome)))) => {
                    results[index] = Some(outcome);
                }
                Step::Joined(Some(Err(join_error))) => {
                    // The index is lost with the task; surface it at the end.
                    tracing::debug!(error = %join_error, "map worker terminated abnormally");
                }
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    Err(RelayError::config("map worker produced no result"))
                })
            })
            .collect()
    }
}

/// Spawn one worker per item behind a shared semaphore.
///
/// `f` runs only after a permit is acquired, so at most `concurrency` item
/// futures ever exist at once.
fn spawn_workers<T, R, F, Fut>(
    items: Vec<T>,
    f: F,
    options: MapOptions,
    cancel: &CancelToken,
) -> JoinSet<(usize, Result<R>)>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let f = Arc::new(f);
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let f = Arc::clone(&f);
        let semaphore = Arc::clone(&semaphore);
        let scope = cancel.clone();
        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, Err(RelayError::config("map semaphore closed"))),
            };
            if let Some(kind) = scope.cause() {
                return (index, Err(RelayError::from_cancel(kind)));
            }
            (index, f(item).await)
        });
    }
    set
}

async fn next_step<R: 'static>(
    cancel: &CancelToken,
    set: &mut JoinSet<(usize, Result<R>)>,
) -> Step<R> {
    tokio::select! {
        kind = cancel.cancelled() => Step::Canceled(kind),
        joined = set.join_next() => Step::Joined(joined),
    }
}
