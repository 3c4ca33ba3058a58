use std::{sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use progress_futures_core::{
    direct, fork, join, resolve, Error, Executor, ListenableFuture, ProgressFuture,
    ProgressFutureMap, ProgressListenableFuture,
};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{info, warn};

use crate::job::SimulatedJob;

mod job;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of simulated jobs to run
    #[arg(short, long, default_value_t = 4)]
    jobs: usize,

    /// Progress steps each job reports before it finishes
    #[arg(short, long, default_value_t = 10)]
    steps: u32,

    /// Delay between two progress steps
    #[arg(long, value_name = "MILLIS", default_value_t = 100)]
    step_millis: u64,

    /// Index of a job that should fail
    #[arg(long, value_name = "INDEX")]
    fail: Option<usize>,

    /// Leave failed jobs out of the fork/join result instead of aborting
    #[arg(long)]
    omit_failures: bool,

    /// Stop waiting for the progress run after this long
    #[arg(long, value_name = "MILLIS")]
    timeout_millis: Option<u64>,
}

type JobMap = ProgressFutureMap<String, ProgressFuture<u64>>;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Cli::parse();

    if let Some(fail) = args.fail {
        if fail >= args.jobs {
            eyre::bail!("--fail {fail} is out of range for {} jobs", args.jobs);
        }
    }

    let jobs = (0..args.jobs)
        .map(|index| {
            SimulatedJob::new(
                index,
                args.steps,
                Duration::from_millis(args.step_millis),
                args.fail == Some(index),
            )
        })
        .collect::<Vec<_>>();

    let handle = Handle::current();

    let map = start(&jobs, Arc::new(handle.clone()))?;
    track(&map, args.timeout_millis.map(Duration::from_millis)).await;

    let forked = fork(jobs, &handle);
    let omit_failures = args.omit_failures;
    let results = tokio::task::spawn_blocking(move || join(forked, omit_failures))
        .await?
        .wrap_err("Fork/join failed")?;

    let mut results = results.into_iter().collect::<Vec<_>>();
    results.sort_by_key(|(job, _)| job.index());
    println!("Fork/join results:");
    for (job, value) in results {
        println!("  {}: {value}", job.name());
    }

    Ok(())
}

/// Starts every job on `executor`, each reporting progress to its own future.
fn start(jobs: &[SimulatedJob], executor: Arc<dyn Executor>) -> Result<JobMap, Error> {
    let map = jobs
        .iter()
        .map(|job| -> Result<(String, ProgressFuture<u64>), Error> {
            let future = ProgressFuture::create();
            let running = future.clone();
            let name = job.name();
            let job = job.clone();
            executor.execute(Box::new(move || job.run(&running)))?;
            Ok((name, future))
        })
        .collect::<Result<JobMap, Error>>()?;

    map.add_listener(Arc::new(|| info!("All jobs done")), executor);
    Ok(map)
}

/// Logs the aggregate progress of `map` until it is done or `timeout` passes.
async fn track(map: &JobMap, timeout: Option<Duration>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    map.add_progress_listener(
        Arc::new(move || {
            let _ = tx.send(());
        }),
        direct(),
    );

    let watch = async {
        let resolved = resolve(map);
        tokio::pin!(resolved);
        loop {
            tokio::select! {
                res = &mut resolved => break res,
                Some(()) = rx.recv() => {
                    info!("Progress: {:.1}%", map.progress() * 100.0);
                }
            }
        }
    };

    let res = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, watch).await {
            Ok(res) => res,
            Err(_) => {
                map.cancel(true);
                Err(Error::Timeout(timeout))
            }
        },
        None => watch.await,
    };

    match res {
        Ok(values) => {
            let mut values = values.into_iter().collect::<Vec<_>>();
            values.sort();
            println!("Progress run results:");
            for (name, value) in values {
                println!("  {name}: {value}");
            }
        }
        Err(err) => warn!(%err, "Progress run did not succeed"),
    }
}
