//! Cancellation and deadline context passed to every external call.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::core::budget::bounded_timeout;

/// Raised when a run is cancelled or its deadline passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledError {
    pub reason: String,
}

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution cancelled: {}", self.reason)
    }
}

impl std::error::Error for CancelledError {}

/// Caller-supplied cancellation and timeout scope.
///
/// Clones share the same cancel flag, so a [`CancelHandle`] taken from one
/// clone cancels every call bound to any of them.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`CancelledError`] if the context is done.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CancelledError {
                reason: "cancelled by caller".to_string(),
            }
            .into());
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CancelledError {
                reason: "deadline exceeded".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Per-call timeout bounded by the context deadline.
    pub fn call_timeout(&self, timeout: Duration) -> Result<Duration> {
        self.check()?;
        bounded_timeout(timeout, self.deadline).map_err(|err| {
            CancelledError {
                reason: err.to_string(),
            }
            .into()
        })
    }
}

/// Handle that cancels a [`RunContext`] from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Whether an error chain was caused by cancellation.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<CancelledError>().is_some())
}
