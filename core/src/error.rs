use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    #[error("future was cancelled")]
    Cancelled,
    #[error("executor rejected task: {0}")]
    Rejected(String),
    /// The computation behind a future failed. The original error is kept as is.
    #[error("{0}")]
    Computation(ComputationError),
}

impl Error {
    /// The underlying computation error, if this is one.
    pub fn computation(&self) -> Option<&ComputationError> {
        match self {
            Error::Computation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ComputationError> for Error {
    fn from(err: ComputationError) -> Self {
        Error::Computation(err)
    }
}

/// Shared handle to the error a computation failed with.
///
/// Every caller of `get()` on a failed future receives a clone of the same
/// handle, so the original error can be inspected with [`downcast_ref`](Self::downcast_ref).
#[derive(Clone)]
pub struct ComputationError {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl ComputationError {
    pub fn msg<M: fmt::Display>(message: M) -> Self {
        Self {
            inner: Arc::new(Message(message.to_string())),
        }
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }

    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl<E> From<E> for ComputationError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            inner: Arc::new(err),
        }
    }
}

impl fmt::Debug for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}
