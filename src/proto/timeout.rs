//! Per-connection idle watchdog.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::error::{Direction, Error};

/// Arms a deadline around every channel read and write.
///
/// The guarded operation and the deadline race inside one task, so
/// scheduling, firing and aborting never overlap. When the deadline
/// wins, the operation is dropped, the caller shuts the armed stream
/// down, and the error is `IdleConnection`; a channel error observed
/// after a firing reports as the timeout with the channel error
/// attached as a secondary.
pub(crate) struct IdleTimer {
    timeout: Duration,
    fired: AtomicBool,
}

impl IdleTimer {
    pub(crate) fn new(timeout: Duration) -> IdleTimer {
        IdleTimer {
            timeout,
            fired: AtomicBool::new(false),
        }
    }

    /// Run `op` under the idle deadline for the given stream.
    pub(crate) async fn guard<F, T>(&self, dir: Direction, op: F) -> Result<T, Error>
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(value) => Ok(value),
            Err(_elapsed) => {
                self.fired.store(true, Ordering::Release);
                debug!("idle timeout fired; shutting down {:?} stream", dir);
                Err(Error::new_idle(dir))
            }
        }
    }

    /// Whether any guarded operation has ever timed out.
    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for IdleTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleTimer")
            .field("timeout", &self.timeout)
            .field("fired", &self.has_fired())
            .finish()
    }
}
