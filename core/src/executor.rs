use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use crate::error::Error;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks, now or later, on this thread or another.
///
/// Returning `Err` means the task was rejected and will never run.
pub trait Executor: Send + Sync + Debug {
    fn execute(&self, task: Task) -> Result<(), Error>;
}

/// Runs every task inline on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        task();
        Ok(())
    }
}

pub fn direct() -> Arc<dyn Executor> {
    Arc::new(DirectExecutor)
}

/// Spawns a fresh OS thread per task.
#[derive(Debug, Default)]
pub struct ThreadExecutor {
    name: Option<String>,
    spawned: AtomicUsize,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        let idx = self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(format!("{name}-{idx}"));
        }
        builder
            .spawn(task)
            .map(|_| ())
            .map_err(|err| Error::Rejected(err.to_string()))
    }
}

// Tasks may block (e.g. `get()` on another future), so they go to the blocking pool.
// A runtime that is shutting down drops the task unrun and this still returns `Ok`;
// `fork` fails the affected future when that happens.
impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: Task) -> Result<(), Error> {
        drop(self.spawn_blocking(task));
        Ok(())
    }
}
