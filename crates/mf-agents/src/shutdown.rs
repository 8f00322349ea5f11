//! Fleet-wide stop: one flag every worker watcher listens to, plus a count
//! of watchers that have let go of their worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// FleetStop
// ---------------------------------------------------------------------------

/// Shared by the supervisor, its worker watchers and whoever may interrupt
/// the fleet (the ctrl-c handler).
///
/// The supervisor calls [`stop`](Self::stop) once the fleet outcome is
/// decided, then waits in [`wait_released`](Self::wait_released) until every
/// watcher has dropped its [`WorkerHold`].
#[derive(Debug, Clone)]
pub struct FleetStop {
    stopping: Arc<watch::Sender<bool>>,
    released: Arc<watch::Sender<usize>>,
}

impl FleetStop {
    pub fn new() -> Self {
        let (stopping, _) = watch::channel(false);
        let (released, _) = watch::channel(0);
        Self {
            stopping: Arc::new(stopping),
            released: Arc::new(released),
        }
    }

    /// Ask every worker to stop. Returns `false` if the fleet was already
    /// stopping.
    pub fn stop(&self) -> bool {
        let first = self.stopping.send_if_modified(|stopping| !std::mem::replace(stopping, true));
        if first {
            info!("fleet stop requested");
        } else {
            debug!("fleet already stopping");
        }
        first
    }

    pub fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Resolves once [`stop`](Self::stop) has been called, including before
    /// this call.
    pub async fn stopped(&self) {
        let mut rx = self.stopping.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Taken by a watcher for as long as it owns a worker.
    pub fn hold(&self) -> WorkerHold {
        WorkerHold {
            released: self.released.clone(),
        }
    }

    /// Wait until `expected` holds have been released, giving up after
    /// `timeout`.
    pub async fn wait_released(&self, expected: usize, timeout: Duration) -> Release {
        let mut rx = self.released.subscribe();
        let outcome = match tokio::time::timeout(timeout, rx.wait_for(|count| *count >= expected)).await {
            Ok(Ok(count)) => Release::Complete(*count),
            Ok(Err(_)) => Release::Complete(*self.released.borrow()),
            Err(_) => {
                let released = *self.released.borrow();
                warn!(released, expected, "workers still held after stop timeout");
                Release::TimedOut { released, expected }
            }
        };
        outcome
    }
}

impl Default for FleetStop {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Complete(usize),
    TimedOut { released: usize, expected: usize },
}

impl Release {
    pub fn is_complete(&self) -> bool {
        matches!(self, Release::Complete(_))
    }
}

// ---------------------------------------------------------------------------
// WorkerHold
// ---------------------------------------------------------------------------

/// Dropping the hold reports the worker as gone.
#[derive(Debug)]
pub struct WorkerHold {
    released: Arc<watch::Sender<usize>>,
}

impl Drop for WorkerHold {
    fn drop(&mut self) {
        self.released.send_modify(|count| *count += 1);
    }
}
