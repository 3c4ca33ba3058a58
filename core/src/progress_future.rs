use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::{
    error::{ComputationError, Error},
    executor::Executor,
    future::{ListenableFuture, ProgressListenableFuture},
    listener::{dispatch, Listener, ReExecutableListenerList},
};

/// A settable future that also carries a progress value in `[0, 1]`.
///
/// Cloning yields another handle to the same future.
pub struct ProgressFuture<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    completed: Condvar,
    listeners: ReExecutableListenerList,
    progress_listeners: ReExecutableListenerList,
}

struct State<V> {
    outcome: Option<Outcome<V>>,
    progress: f32,
}

enum Outcome<V> {
    Succeeded(V),
    Failed(ComputationError),
    Cancelled { interrupted: bool },
}

impl<V: Clone> Outcome<V> {
    fn to_result(&self) -> Result<V, Error> {
        match self {
            Outcome::Succeeded(value) => Ok(value.clone()),
            Outcome::Failed(err) => Err(Error::Computation(err.clone())),
            Outcome::Cancelled { .. } => Err(Error::Cancelled),
        }
    }
}

impl<V> Clone for ProgressFuture<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for ProgressFuture<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ProgressFuture<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    progress: 0.0,
                }),
                completed: Condvar::new(),
                listeners: ReExecutableListenerList::new(),
                progress_listeners: ReExecutableListenerList::new(),
            }),
        }
    }

    pub fn create() -> Self {
        Self::new()
    }

    /// A future that already succeeded with `value`.
    pub fn immediate(value: V) -> Self {
        let future = Self::new();
        future.set(value);
        future
    }

    /// A future that already failed with `err`.
    pub fn immediate_failed(err: impl Into<ComputationError>) -> Self {
        let future = Self::new();
        future.set_exception(err);
        future
    }

    /// Completes the future with `value`.
    ///
    /// Returns `false`, leaving everything untouched, if it was already done.
    pub fn set(&self, value: V) -> bool {
        self.complete(Outcome::Succeeded(value))
    }

    pub fn set_exception(&self, err: impl Into<ComputationError>) -> bool {
        self.complete(Outcome::Failed(err.into()))
    }

    /// Updates the progress and notifies progress listeners.
    ///
    /// Values outside `[0, 1]` are rejected. Once the future is done its
    /// progress is pinned to `1.0` and this returns `Ok(false)`.
    /// Progress is not required to be monotonic.
    pub fn set_progress(&self, progress: f32) -> Result<bool, Error> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(Error::InvalidArgument(format!(
                "progress must be between 0 and 1, got {progress}"
            )));
        }

        {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return Ok(false);
            }
            state.progress = progress;
        }

        self.inner.progress_listeners.execute();
        Ok(true)
    }

    /// Returns the outcome without blocking, or `None` while pending.
    pub fn try_get(&self) -> Option<Result<V, Error>>
    where
        V: Clone,
    {
        let state = self.inner.state.lock();
        state.outcome.as_ref().map(Outcome::to_result)
    }

    /// Whether the future was cancelled with `may_interrupt` set.
    pub fn was_interrupted(&self) -> bool {
        matches!(
            self.inner.state.lock().outcome,
            Some(Outcome::Cancelled { interrupted: true })
        )
    }

    fn complete(&self, outcome: Outcome<V>) -> bool {
        {
            // only sync code in this block
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            debug!(outcome = outcome.name(), "Future completed");
            state.outcome = Some(outcome);
            state.progress = 1.0;
            self.inner.completed.notify_all();
        }

        // Listeners registered from here on see a done future and are dispatched directly.
        self.inner.progress_listeners.execute();
        self.inner.listeners.execute();
        true
    }

    /// Registers `listener` with `list` unless the future is already done,
    /// in which case it is dispatched right away.
    fn register(
        &self,
        list: &ReExecutableListenerList,
        listener: Listener,
        executor: Arc<dyn Executor>,
    ) {
        {
            let state = self.inner.state.lock();
            if state.outcome.is_none() {
                list.add(listener, executor);
                return;
            }
        }

        dispatch(&listener, &executor);
    }
}

impl<V> Outcome<V> {
    fn name(&self) -> &'static str {
        match self {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled { .. } => "cancelled",
        }
    }
}

impl<V> ListenableFuture for ProgressFuture<V>
where
    V: Clone + Send + 'static,
{
    type Output = V;

    fn add_listener(&self, listener: Listener, executor: Arc<dyn Executor>) {
        self.register(&self.inner.listeners, listener, executor);
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        self.complete(Outcome::Cancelled {
            interrupted: may_interrupt,
        })
    }

    fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.state.lock().outcome,
            Some(Outcome::Cancelled { .. })
        )
    }

    fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    fn get(&self) -> Result<V, Error> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.to_result();
            }
            self.inner.completed.wait(&mut state);
        }
    }

    fn get_timeout(&self, timeout: Duration) -> Result<V, Error> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };

        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.to_result();
            }
            if self
                .inner
                .completed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match &state.outcome {
                    Some(outcome) => outcome.to_result(),
                    None => Err(Error::Timeout(timeout)),
                };
            }
        }
    }
}

impl<V> ProgressListenableFuture for ProgressFuture<V>
where
    V: Clone + Send + 'static,
{
    fn progress(&self) -> f32 {
        self.inner.state.lock().progress
    }

    fn add_progress_listener(&self, listener: Listener, executor: Arc<dyn Executor>) {
        self.register(&self.inner.progress_listeners, listener, executor);
    }
}

impl<V> fmt::Debug for ProgressFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ProgressFuture")
            .field(
                "state",
                &state.outcome.as_ref().map_or("pending", Outcome::name),
            )
            .field("progress", &state.progress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use super::*;
    use crate::executor::direct;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let listener: Listener = {
            let count = count.clone();
            Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, listener)
    }

    #[test]
    fn progress_listeners_fire_on_every_update() {
        let future = ProgressFuture::<()>::create();
        let (first, l1) = counter();
        let (second, l2) = counter();
        future.add_progress_listener(l1, direct());
        future.add_progress_listener(l2, direct());

        for (i, progress) in [0.1, 0.2, 0.3].into_iter().enumerate() {
            assert!(future.set_progress(progress).unwrap());
            assert_eq!(first.load(Ordering::SeqCst), i + 1);
            assert_eq!(second.load(Ordering::SeqCst), i + 1);
        }
        assert_eq!(future.progress(), 0.3);
    }

    #[test]
    fn out_of_range_progress_is_rejected() {
        let future = ProgressFuture::<()>::create();
        future.set_progress(0.5).unwrap();

        for progress in [-0.1, 1.1, f32::NAN] {
            match future.set_progress(progress) {
                Err(Error::InvalidArgument(_)) => {}
                other => panic!("Expected InvalidArgument, got: {other:?}"),
            }
        }
        assert_eq!(future.progress(), 0.5);
    }

    #[test]
    fn progress_is_frozen_once_done() {
        let future = ProgressFuture::<()>::create();
        future.set(());
        assert!(!future.set_progress(0.9).unwrap());
        assert_eq!(future.progress(), 1.0);
    }

    #[test]
    fn completion_fires_progress_listeners() {
        let future = ProgressFuture::<()>::create();
        let (count, listener) = counter();
        future.add_progress_listener(listener, direct());

        assert!(future.set(()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(future.progress(), 1.0);
    }

    #[test]
    fn failure_fires_progress_listeners() {
        let future = ProgressFuture::<()>::create();
        let (count, listener) = counter();
        future.add_progress_listener(listener, direct());
        future.set_progress(0.25).unwrap();

        assert!(future.set_exception(Boom));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(future.progress(), 1.0);
    }

    #[test]
    fn second_set_is_ignored() {
        let future = ProgressFuture::create();
        let (count, listener) = counter();
        future.add_listener(listener, direct());

        assert!(future.set("first"));
        assert!(!future.set("second"));
        assert!(!future.set_exception(Boom));
        assert!(!future.cancel(true));

        assert_eq!(future.get().unwrap(), "first");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_on_done_future_fires_once_immediately() {
        let future = ProgressFuture::immediate(7);
        let (done, l1) = counter();
        let (progress, l2) = counter();
        future.add_listener(l1, direct());
        future.add_progress_listener(l2, direct());

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(progress.load(Ordering::SeqCst), 1);

        assert!(!future.set(8));
        assert!(!future.set_progress(0.5).unwrap());
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(progress.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_surfaced_verbatim() {
        let future = ProgressFuture::<u8>::immediate_failed(Boom);
        let err = future.get().unwrap_err();
        assert!(err.computation().unwrap().downcast_ref::<Boom>().is_some());
        assert!(future.is_done());
        assert!(!future.is_cancelled());
    }

    #[test]
    fn cancel() {
        let future = ProgressFuture::<u8>::create();
        let (count, listener) = counter();
        future.add_listener(listener, direct());

        assert!(future.cancel(true));
        assert!(future.is_cancelled());
        assert!(future.was_interrupted());
        assert_eq!(future.progress(), 1.0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(future.get(), Err(Error::Cancelled)));
    }

    #[test]
    fn get_timeout_expires() {
        let future = ProgressFuture::<u8>::create();
        match future.get_timeout(Duration::from_millis(20)) {
            Err(Error::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(20)),
            other => panic!("Expected timeout, got: {other:?}"),
        }
        assert!(future.try_get().is_none());
    }

    #[test]
    fn get_wakes_up_on_completion() {
        let future = ProgressFuture::create();
        let setter = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(5)
        });

        assert_eq!(future.get_timeout(Duration::from_secs(5)).unwrap(), 5);
        assert!(handle.join().unwrap());
        assert_eq!(future.try_get().unwrap().unwrap(), 5);
    }

    #[test]
    fn concurrent_registration_and_completion_fire_exactly_once() {
        for _ in 0..50 {
            let future = ProgressFuture::create();
            let (count, listener) = counter();

            thread::scope(|s| {
                let registering = future.clone();
                s.spawn(move || registering.add_listener(listener, direct()));
                let completing = future.clone();
                s.spawn(move || completing.set(1));
            });

            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn resolve_awaits_completion() {
        let future = ProgressFuture::create();
        let setter = future.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            setter.set("done");
        });

        assert_eq!(crate::future::resolve(&future).await.unwrap(), "done");
    }
}
