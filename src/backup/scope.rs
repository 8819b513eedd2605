use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

/// Execution policy handed to every `create`/`rollback`.
///
/// Operations run without a deadline and do not stop when a host raises the
/// cancellation flag. The flag is only reported, once, at the next checkpoint.
#[derive(Debug)]
pub struct ExecutionScope {
    operation: String,
    started: Instant,
    cancel: Arc<AtomicBool>,
    reported: AtomicBool,
}

impl ExecutionScope {
    pub fn uninterruptible(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started: Instant::now(),
            cancel: Arc::new(AtomicBool::new(false)),
            reported: AtomicBool::new(false),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Flag a host may raise to ask for cancellation.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn deadline(&self) -> Option<Instant> {
        None
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Called between phases. Never aborts.
    pub fn checkpoint(&self, stage: &str) {
        if self.cancel.load(Ordering::Relaxed) && !self.reported.swap(true, Ordering::Relaxed) {
            warn!(operation = %self.operation, stage, "cancellation requested; continuing until the operation completes");
        }
    }

    pub fn cancellation_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}
