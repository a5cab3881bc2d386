use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::concurrent::latch::{Failure, FailureLatch};
use crate::concurrent::slots::ResultSlots;
use crate::config::config;
use crate::runtime;

pub(crate) mod latch;
pub(crate) mod slots;

/// What an admitted task reports back to the coordinator.
enum TaskOutcome<O> {
    Mapped { index: usize, output: O },
    /// The transform failed or panicked and the failure was offered to the latch.
    Failed,
    /// Another task had already failed when this one got its turn, so the transform never ran.
    Skipped,
}

/// A single admitted transform, holding its concurrency permit until it reports back.
struct MapTask<Fut, E> {
    index: usize,
    permit: Option<OwnedSemaphorePermit>,
    latch: Arc<FailureLatch<E>>,
    work: Fut,
}

impl<Fut, O, E> MapTask<Fut, E>
where
    Fut: Future<Output = Result<O, E>>,
{
    async fn run(self) -> TaskOutcome<O> {
        let MapTask {
            index,
            permit,
            latch,
            work,
        } = self;
        // released only after the latch is claimed, so a freed slot never admits work that
        // should have been suppressed
        let _permit = permit;

        if latch.is_claimed() {
            return TaskOutcome::Skipped;
        }

        let failure = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(output)) => return TaskOutcome::Mapped { index, output },
            Ok(Err(e)) => Failure::Task(e),
            Err(payload) => Failure::Panic(payload),
        };

        if latch.claim(failure) {
            warn!(index, "Transform failed, not admitting any more tasks");
        } else {
            debug!(index, "Transform failed after another failure, dropping its error");
        }
        TaskOutcome::Failed
    }
}

/// Applies `transform` to every item with at most `limit` transforms in flight at once
/// (`0` means unbounded) and returns the outputs in input order.
///
/// The first failure wins: no further items are admitted, transforms that are already running
/// are allowed to finish, their outputs are dropped and the winning error is returned. The call
/// returns only once every spawned task has completed.
///
/// A transform that panics counts as a failure. Its panic is resumed on the caller after all
/// tasks have been joined, so a [`crate::recover`] guard around the call reports it.
///
/// ```ignore
/// let addresses = map_concurrent(indexes, 4, |index| {
///     let client = client.clone();
///     async move { client.derive_address(index).await }
/// })
/// .await?;
/// ```
pub async fn map_concurrent<I, O, E, F, Fut>(
    items: Vec<I>,
    limit: usize,
    transform: F,
) -> Result<Vec<O>, E>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    let total = items.len();
    debug!(total, limit, "Starting concurrent map");

    let semaphore =
        (limit > 0).then(|| Arc::new(Semaphore::new(limit.min(Semaphore::MAX_PERMITS))));
    let latch = Arc::new(FailureLatch::new());
    let mut slots = ResultSlots::with_len(total);
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        if latch.is_claimed() {
            break;
        }

        let permit = match &semaphore {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .expect("map semaphore is never closed"),
            ),
            None => None,
        };

        // a running task may have failed while we waited for the permit
        if latch.is_claimed() {
            break;
        }

        // the synchronous part of the transform runs here, a panic in it must not drop the
        // JoinSet (which would abort the tasks already running)
        let work = match panic::catch_unwind(AssertUnwindSafe(|| transform(item))) {
            Ok(work) => work,
            Err(payload) => {
                if latch.claim(Failure::Panic(payload)) {
                    warn!(index, "Transform panicked before starting, not admitting any more tasks");
                }
                break;
            }
        };

        tasks.spawn(
            MapTask {
                index,
                permit,
                latch: Arc::clone(&latch),
                work,
            }
            .run(),
        );
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(TaskOutcome::Mapped { index, output }) => slots.fill(index, output),
            Ok(TaskOutcome::Failed | TaskOutcome::Skipped) => {}
            Err(e) => {
                let payload = e.try_into_panic().unwrap_or_else(|e| -> Box<dyn Any + Send> {
                    Box::new(format!("map task did not complete: {e}"))
                });
                latch.claim(Failure::Panic(payload));
            }
        }
    }

    match latch.take() {
        None => {
            debug!(total, mapped = slots.filled(), "Concurrent map completed");
            Ok(slots
                .into_ordered()
                .expect("every item is mapped when no task failed"))
        }
        Some(Failure::Task(e)) => Err(e),
        Some(Failure::Panic(payload)) => panic::resume_unwind(payload),
    }
}

/// [`map_concurrent`] for a synchronous transform that may block, e.g. key derivation or a
/// blocking RPC client. Each admitted transform runs on tokio's blocking pool.
pub async fn map_concurrent_blocking<I, O, E, F>(
    items: Vec<I>,
    limit: usize,
    transform: F,
) -> Result<Vec<O>, E>
where
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    let transform = Arc::new(transform);
    map_concurrent(items, limit, move |item| {
        let transform = Arc::clone(&transform);
        async move {
            match tokio::task::spawn_blocking(move || transform(item)).await {
                Ok(result) => result,
                Err(e) => match e.try_into_panic() {
                    Ok(payload) => panic::resume_unwind(payload),
                    Err(e) => panic!("blocking transform did not complete: {e}"),
                },
            }
        }
    })
    .await
}

/// Blocking entry point for synchronous callers such as exported SDK functions. Drives
/// [`map_concurrent_blocking`] on the [`runtime::shared`] runtime.
///
/// # Panics
///
/// Panics when called from within an async context.
pub fn map_concurrent_sync<I, O, E, F>(
    items: Vec<I>,
    limit: usize,
    transform: F,
) -> Result<Vec<O>, E>
where
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    runtime::shared().block_on(map_concurrent_blocking(items, limit, transform))
}

/// Maps strings to strings with the configured default concurrency
/// (`WALLET_BASE_MAP_CONCURRENCY`, 10 unless set).
pub fn map_strings_concurrent<E, F>(items: Vec<String>, transform: F) -> Result<Vec<String>, E>
where
    F: Fn(String) -> Result<String, E> + Send + Sync + 'static,
    E: Send + 'static,
{
    map_concurrent_sync(items, config().map_concurrency, transform)
}
