use std::{sync::Arc, time::Duration};

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::{
    error::Error,
    executor::{direct, Executor},
    listener::Listener,
};

/// A value that becomes available exactly once, with completion callbacks.
pub trait ListenableFuture: Send + Sync {
    type Output;

    /// Runs `listener` on `executor` once the future is done.
    ///
    /// If it already is, the listener is dispatched right away.
    fn add_listener(&self, listener: Listener, executor: Arc<dyn Executor>);

    fn cancel(&self, may_interrupt: bool) -> bool;

    fn is_cancelled(&self) -> bool;

    /// `true` once the future succeeded, failed or was cancelled.
    fn is_done(&self) -> bool;

    /// Blocks the current thread until the future is done.
    fn get(&self) -> Result<Self::Output, Error>;

    /// Like [`get`](Self::get), but gives up with [`Error::Timeout`] after `timeout`.
    fn get_timeout(&self, timeout: Duration) -> Result<Self::Output, Error>;
}

/// A [`ListenableFuture`] that also reports how far along it is.
pub trait ProgressListenableFuture: ListenableFuture {
    /// Fraction of the work done, in `[0, 1]`.
    fn progress(&self) -> f32;

    fn add_progress_listener(&self, listener: Listener, executor: Arc<dyn Executor>);
}

impl<T: ListenableFuture + ?Sized> ListenableFuture for Arc<T> {
    type Output = T::Output;

    fn add_listener(&self, listener: Listener, executor: Arc<dyn Executor>) {
        (**self).add_listener(listener, executor)
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        (**self).cancel(may_interrupt)
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }

    fn get(&self) -> Result<Self::Output, Error> {
        (**self).get()
    }

    fn get_timeout(&self, timeout: Duration) -> Result<Self::Output, Error> {
        (**self).get_timeout(timeout)
    }
}

impl<T: ProgressListenableFuture + ?Sized> ProgressListenableFuture for Arc<T> {
    fn progress(&self) -> f32 {
        (**self).progress()
    }

    fn add_progress_listener(&self, listener: Listener, executor: Arc<dyn Executor>) {
        (**self).add_progress_listener(listener, executor)
    }
}

/// Resolves once `future` is done, without blocking the async runtime.
pub async fn done<F: ListenableFuture + ?Sized>(future: &F) {
    let (tx, rx) = oneshot::channel::<()>();
    let tx = Mutex::new(Some(tx));
    future.add_listener(
        Arc::new(move || {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        }),
        direct(),
    );
    // The sender lives as long as the future's listener list, so this only
    // errors if the future itself was dropped.
    let _ = rx.await;
}

/// Awaits [`done`] and then collects the outcome.
pub async fn resolve<F: ListenableFuture + ?Sized>(future: &F) -> Result<F::Output, Error> {
    done(future).await;
    future.get()
}
