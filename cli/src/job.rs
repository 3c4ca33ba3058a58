use std::{thread, time::Duration};

use progress_futures_core::{Callable, ComputationError, ListenableFuture, ProgressFuture};
use thiserror::Error;
use tracing::{debug, warn};

/// A stand-in for real work: sleeps through a number of steps, then yields a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimulatedJob {
    index: usize,
    steps: u32,
    step: Duration,
    fails: bool,
}

#[derive(Debug, Error)]
#[error("job {0} failed on purpose")]
pub struct JobFailed(pub usize);

impl SimulatedJob {
    pub fn new(index: usize, steps: u32, step: Duration, fails: bool) -> Self {
        Self {
            index,
            steps,
            step,
            fails,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> String {
        format!("job-{}", self.index)
    }

    /// Runs the job to completion, reporting progress to `future` after every step.
    ///
    /// Stops early if the future gets cancelled.
    pub fn run(&self, future: &ProgressFuture<u64>) {
        let res = self.work(|progress| {
            if future.is_cancelled() {
                return false;
            }
            if let Err(err) = future.set_progress(progress) {
                warn!(job = self.index, %err, "Failed to report progress");
            }
            true
        });

        match res {
            Some(Ok(value)) => future.set(value),
            Some(Err(err)) => future.set_exception(err),
            None => {
                debug!(job = self.index, "Job cancelled");
                false
            }
        };
    }

    /// Returns `None` if `on_step` asked to stop.
    fn work(&self, mut on_step: impl FnMut(f32) -> bool) -> Option<Result<u64, JobFailed>> {
        for step in 1..=self.steps {
            thread::sleep(self.step);
            if !on_step(step as f32 / self.steps as f32) {
                return None;
            }
        }

        if self.fails {
            Some(Err(JobFailed(self.index)))
        } else {
            Some(Ok(self.index as u64 * u64::from(self.steps)))
        }
    }
}

impl Callable for SimulatedJob {
    type Output = u64;

    fn call(&self) -> Result<u64, ComputationError> {
        match self.work(|_| true) {
            Some(res) => res.map_err(ComputationError::from),
            None => Err(ComputationError::msg("job stopped early")),
        }
    }
}
