// TODO: Re-enable and fix
// #![warn(clippy::pedantic)]

// #![warn(clippy::nursery)]
// #![warn(clippy::cargo)]
#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
// #![warn(clippy::todo)]
// #![warn(clippy::unimplemented)]
// #![warn(clippy::dbg_macro)]
// #![warn(clippy::unreachable)]
// #![warn(clippy::panic)]

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Futures that report fractional progress, and maps of them that behave as
//! one aggregate future.

pub mod error;
pub mod executor;
pub mod fork_join;
pub mod future;
pub mod future_map;
pub mod listener;
pub mod progress_future;


pub use error::{ComputationError, Error};
pub use executor::{direct, DirectExecutor, Executor, ThreadExecutor};
pub use fork_join::{fork, join, join_all, Callable};
pub use future::{done, resolve, ListenableFuture, ProgressListenableFuture};
pub use future_map::ProgressFutureMap;
pub use listener::{Listener, ReExecutableListenerList};
pub use progress_future::ProgressFuture;
