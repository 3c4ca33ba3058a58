//! Running a batch of independent computations and collecting their results.
//!
//! [`fork`] submits every [`Callable`] to an [`Executor`] and hands back one
//! future per callable, keyed by the callable itself. [`join`] blocks until all
//! of them are done and maps each callable to its result.

use std::{
    collections::HashMap,
    hash::Hash,
    panic::{self, AssertUnwindSafe},
};

use tracing::{debug, warn};

use crate::{
    error::{ComputationError, Error},
    executor::Executor,
    future::ListenableFuture,
    listener::panic_message,
    progress_future::ProgressFuture,
};

/// A deferred computation that can be submitted to an [`Executor`].
pub trait Callable: Send + Sync + 'static {
    type Output: Send + 'static;

    fn call(&self) -> Result<Self::Output, ComputationError>;
}

/// Submits every callable to `executor`.
///
/// A callable that panics fails its future. So does one the executor refuses
/// to run, with [`Error::Rejected`] as the cause.
pub fn fork<C, I, E>(callables: I, executor: &E) -> HashMap<C, ProgressFuture<C::Output>>
where
    C: Callable + Clone + Eq + Hash,
    I: IntoIterator<Item = C>,
    E: Executor + ?Sized,
{
    callables
        .into_iter()
        .map(|callable| {
            let future = ProgressFuture::new();

            let task = {
                let callable = callable.clone();
                let guard = Unstarted(future.clone());
                Box::new(move || {
                    let future = &guard.0;
                    match panic::catch_unwind(AssertUnwindSafe(|| callable.call())) {
                        Ok(Ok(value)) => future.set(value),
                        Ok(Err(err)) => future.set_exception(err),
                        Err(panic) => future.set_exception(ComputationError::msg(format!(
                            "computation panicked: {}",
                            panic_message(&*panic)
                        ))),
                    };
                })
            };

            if let Err(err) = executor.execute(task) {
                warn!(%err, "Executor rejected forked computation");
                future.set_exception(err);
            }

            (callable, future)
        })
        .collect()
}

/// Fails the wrapped future if it is dropped before being completed.
///
/// Covers executors that accept a task and then discard it unrun, such as a
/// tokio runtime that is shutting down.
struct Unstarted<V>(ProgressFuture<V>);

impl<V> Drop for Unstarted<V> {
    fn drop(&mut self) {
        let dropped = self
            .0
            .set_exception(Error::Rejected("task dropped by executor".to_string()));
        if dropped {
            warn!("Forked computation was dropped before it ran");
        }
    }
}

/// Same as [`join`] with `omit_failures` set to `false`.
pub fn join_all<C, F>(forked: HashMap<C, F>) -> Result<HashMap<C, F::Output>, Error>
where
    C: Eq + Hash,
    F: ListenableFuture,
{
    join(forked, false)
}

/// Waits for every future and maps each key to its result.
///
/// With `omit_failures` unset, the first failure encountered is returned as
/// is. With it set, failed entries are simply left out of the result.
pub fn join<C, F>(forked: HashMap<C, F>, omit_failures: bool) -> Result<HashMap<C, F::Output>, Error>
where
    C: Eq + Hash,
    F: ListenableFuture,
{
    let mut results = HashMap::with_capacity(forked.len());

    for (callable, future) in forked {
        match future.get() {
            Ok(value) => {
                results.insert(callable, value);
            }
            Err(err) if omit_failures => {
                debug!(%err, "Omitting failed computation");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(results)
}
