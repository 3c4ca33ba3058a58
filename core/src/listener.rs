use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::error;

use crate::executor::Executor;

/// A callback that may be invoked any number of times.
pub type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

struct Registration {
    listener: Listener,
    executor: Arc<dyn Executor>,
}

impl Registration {
    fn dispatch(&self) {
        dispatch(&self.listener, &self.executor);
    }
}

/// Hands `listener` to `executor` once, logging instead of propagating any failure.
///
/// A panicking listener is caught on whichever thread the executor runs it.
pub(crate) fn dispatch(listener: &Listener, executor: &Arc<dyn Executor>) {
    let listener = listener.clone();
    let task = Box::new(move || {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener())) {
            error!(panic = panic_message(&*panic), "Listener panicked");
        }
    });

    match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(task))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(%err, ?executor, "Failed to dispatch listener");
        }
        Err(panic) => {
            error!(
                panic = panic_message(&*panic),
                ?executor,
                "Executor panicked during dispatch"
            );
        }
    }
}

/// Listener list that can be fired any number of times.
///
/// Registrations are never removed. Every call to [`execute`](Self::execute)
/// dispatches all of them again, in registration order.
pub struct ReExecutableListenerList {
    // Replaced wholesale on every add, so `execute` can iterate a snapshot without holding the lock.
    registrations: Mutex<Arc<[Arc<Registration>]>>,
}

impl ReExecutableListenerList {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Arc::from(Vec::new())),
        }
    }

    pub fn add(&self, listener: Listener, executor: Arc<dyn Executor>) {
        let registration = Arc::new(Registration { listener, executor });

        let mut registrations = self.registrations.lock();
        let next: Arc<[Arc<Registration>]> = registrations
            .iter()
            .cloned()
            .chain(std::iter::once(registration))
            .collect();
        *registrations = next;
    }

    /// Hands every registered listener to its executor.
    ///
    /// Failures are logged per listener and never reach the caller.
    pub fn execute(&self) {
        let snapshot = self.registrations.lock().clone();
        for registration in snapshot.iter() {
            registration.dispatch();
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReExecutableListenerList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReExecutableListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReExecutableListenerList")
            .field("len", &self.len())
            .finish()
    }
}

pub(crate) fn panic_message<'a>(panic: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::{
        error::Error,
        executor::{direct, Task, ThreadExecutor},
    };

    #[derive(Debug)]
    struct RejectingExecutor;

    impl Executor for RejectingExecutor {
        fn execute(&self, _task: Task) -> Result<(), Error> {
            Err(Error::Rejected("shut down".to_string()))
        }
    }

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
    fn every_execute_dispatches_again() {
        let list = ReExecutableListenerList::new();
        let (first, l1) = counter();
        let (second, l2) = counter();
        list.add(l1, direct());
        list.add(l2, direct());

        for round in 1..=3 {
            list.execute();
            assert_eq!(first.load(Ordering::SeqCst), round);
            assert_eq!(second.load(Ordering::SeqCst), round);
        }
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn dispatches_in_registration_order() {
        let list = ReExecutableListenerList::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            list.add(Arc::new(move || order.lock().push(i)), direct());
        }
        list.execute();
        assert_eq!(*order.lock(), [0, 1, 2, 3]);
    }

    #[test]
    fn panicking_listener_does_not_stop_siblings() {
        let list = ReExecutableListenerList::new();
        let (count, listener) = counter();
        list.add(Arc::new(|| panic!("buggy observer")), direct());
        list.add(listener, direct());

        list.execute();
        list.execute();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    /// Runs each task on its own thread and records whether that thread unwound.
    #[derive(Debug, Default)]
    struct JoiningExecutor {
        clean_exits: Mutex<Vec<bool>>,
    }

    impl Executor for JoiningExecutor {
        fn execute(&self, task: Task) -> Result<(), Error> {
            let exit = thread::spawn(task).join();
            self.clean_exits.lock().push(exit.is_ok());
            Ok(())
        }
    }

    #[test]
    fn listener_panic_is_caught_on_the_executor_thread() {
        let executor = Arc::new(JoiningExecutor::default());
        let list = ReExecutableListenerList::new();
        let (count, listener) = counter();
        list.add(Arc::new(|| panic!("buggy observer")), executor.clone());
        list.add(listener, executor.clone());

        list.execute();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*executor.clean_exits.lock(), [true, true]);
    }

    #[test]
    fn listener_panic_on_thread_executor_leaves_siblings_running() {
        let list = ReExecutableListenerList::new();
        let (tx, rx) = mpsc::channel();
        list.add(Arc::new(|| panic!("buggy observer")), Arc::new(ThreadExecutor::new()));
        list.add(
            Arc::new(move || {
                let _ = tx.send(());
            }),
            Arc::new(ThreadExecutor::new()),
        );

        list.execute();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn rejected_dispatch_does_not_stop_siblings() {
        let list = ReExecutableListenerList::new();
        let (rejected, l1) = counter();
        let (count, l2) = counter();
        list.add(l1, Arc::new(RejectingExecutor));
        list.add(l2, direct());

        list.execute();
        assert_eq!(rejected.load(Ordering::SeqCst), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_list_executes_nothing() {
        let list = ReExecutableListenerList::default();
        assert!(list.is_empty());
        list.execute();
    }
}
