use std::{
    borrow::Borrow,
    collections::{hash_map, HashMap},
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    error::Error,
    executor::{direct, Executor},
    future::{ListenableFuture, ProgressListenableFuture},
    listener::{dispatch, Listener},
    progress_future::ProgressFuture,
};

/// An immutable map of futures that is itself a future of the map of their results.
///
/// The aggregate is done once every constituent is done, whether it
/// succeeded, failed or was cancelled. Failures only surface through
/// [`get`](ListenableFuture::get). An empty map is done from the start.
#[derive(Debug)]
pub struct ProgressFutureMap<K, F> {
    entries: Arc<HashMap<K, F>>,
}

impl<K, F> Clone for ProgressFutureMap<K, F> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

const IMMUTABLE: &str = "future map is immutable";

impl<K: Eq + Hash, F> ProgressFutureMap<K, F> {
    pub fn of(entries: impl IntoIterator<Item = (K, F)>) -> Self {
        Self {
            entries: Arc::new(entries.into_iter().collect()),
        }
    }

    pub fn single(key: K, future: F) -> Self {
        Self::of([(key, future)])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// The constituent future stored under `key`.
    pub fn future<Q>(&self, key: &Q) -> Option<&F>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn keys(&self) -> hash_map::Keys<'_, K, F> {
        self.entries.keys()
    }

    pub fn futures(&self) -> hash_map::Values<'_, K, F> {
        self.entries.values()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, F> {
        self.entries.iter()
    }

    /// Always fails with [`Error::UnsupportedOperation`].
    pub fn insert(&self, _key: K, _future: F) -> Result<Option<F>, Error> {
        Err(Error::UnsupportedOperation(IMMUTABLE))
    }

    /// Always fails with [`Error::UnsupportedOperation`].
    pub fn remove<Q>(&self, _key: &Q) -> Result<Option<F>, Error>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Err(Error::UnsupportedOperation(IMMUTABLE))
    }

    /// Always fails with [`Error::UnsupportedOperation`].
    pub fn clear(&self) -> Result<(), Error> {
        Err(Error::UnsupportedOperation(IMMUTABLE))
    }
}

impl<K: Eq + Hash, V> ProgressFutureMap<K, ProgressFuture<V>> {
    pub fn immediate(key: K, value: V) -> Self {
        Self::single(key, ProgressFuture::immediate(value))
    }

    pub fn immediate_from(values: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::of(
            values
                .into_iter()
                .map(|(key, value)| (key, ProgressFuture::immediate(value))),
        )
    }

    /// Maps every key to an already completed future of `value`.
    pub fn immediate_for_keys(keys: impl IntoIterator<Item = K>, value: V) -> Self
    where
        V: Clone,
    {
        Self::of(
            keys.into_iter()
                .map(|key| (key, ProgressFuture::immediate(value.clone()))),
        )
    }
}

impl<K, F> FromIterator<(K, F)> for ProgressFutureMap<K, F>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, F)>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl<'a, K, F> IntoIterator for &'a ProgressFutureMap<K, F> {
    type Item = (&'a K, &'a F);
    type IntoIter = hash_map::Iter<'a, K, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// One aggregate listener registration, shared by the wrappers on every constituent.
struct FanIn {
    remaining: AtomicUsize,
    listener: Listener,
    executor: Arc<dyn Executor>,
}

impl FanIn {
    fn arrive(&self) {
        // Only the arrival that takes the count to zero dispatches.
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("All constituents done, notifying aggregate listener");
            dispatch(&self.listener, &self.executor);
        }
    }
}

impl<K, F> ListenableFuture for ProgressFutureMap<K, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    F: ListenableFuture + 'static,
{
    type Output = HashMap<K, F::Output>;

    fn add_listener(&self, listener: Listener, executor: Arc<dyn Executor>) {
        if self.entries.is_empty() || self.is_done() {
            dispatch(&listener, &executor);
            return;
        }

        let fan_in = Arc::new(FanIn {
            remaining: AtomicUsize::new(self.entries.len()),
            listener,
            executor,
        });

        for future in self.entries.values() {
            let fan_in = fan_in.clone();
            let counted = AtomicBool::new(false);
            future.add_listener(
                Arc::new(move || {
                    if !counted.swap(true, Ordering::AcqRel) {
                        fan_in.arrive();
                    }
                }),
                direct(),
            );
        }
    }

    /// Attempts to cancel every constituent, even after one refused.
    fn cancel(&self, may_interrupt: bool) -> bool {
        let mut cancelled = true;
        for future in self.entries.values() {
            cancelled &= future.cancel(may_interrupt);
        }
        cancelled
    }

    fn is_cancelled(&self) -> bool {
        self.entries.values().all(|future| future.is_cancelled())
    }

    fn is_done(&self) -> bool {
        self.entries.values().all(|future| future.is_done())
    }

    fn get(&self) -> Result<Self::Output, Error> {
        self.entries
            .iter()
            .map(|(key, future)| future.get().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Waits for all constituents against a single deadline `timeout` from now.
    fn get_timeout(&self, timeout: Duration) -> Result<Self::Output, Error> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };

        self.entries
            .iter()
            .map(|(key, future)| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match future.get_timeout(remaining) {
                    Ok(value) => Ok((key.clone(), value)),
                    Err(Error::Timeout(_)) => Err(Error::Timeout(timeout)),
                    Err(err) => Err(err),
                }
            })
            .collect()
    }
}

impl<K, F> ProgressListenableFuture for ProgressFutureMap<K, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    F: ProgressListenableFuture + 'static,
{
    /// `1.0` once done, the mean of the constituents' progress before that.
    fn progress(&self) -> f32 {
        if self.is_done() {
            return 1.0;
        }
        let total: f32 = self.entries.values().map(|future| future.progress()).sum();
        total / self.entries.len() as f32
    }

    /// Fires on every progress update of every constituent.
    fn add_progress_listener(&self, listener: Listener, executor: Arc<dyn Executor>) {
        if self.is_done() {
            dispatch(&listener, &executor);
            return;
        }

        // A constituent that is already done dispatches once right away.
        for future in self.entries.values() {
            future.add_progress_listener(listener.clone(), executor.clone());
        }
    }
}
