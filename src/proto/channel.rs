//! Logical state of one client channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::attributes::Attributes;

/// Shared, logical view of a full-duplex client channel.
///
/// tokio offers no per-direction `shutdown(2)`, so "shutting down" a
/// stream here means flipping its open flag; the reader and writer stop
/// using a stream whose flag is down, which is observationally the same
/// for the exchange state machine.
pub(crate) struct ChannelState {
    input_open: AtomicBool,
    output_open: AtomicBool,
    attributes: Mutex<Attributes>,
}

impl ChannelState {
    pub(crate) fn new() -> ChannelState {
        ChannelState {
            input_open: AtomicBool::new(true),
            output_open: AtomicBool::new(true),
            attributes: Mutex::new(Attributes::new()),
        }
    }

    pub(crate) fn is_input_open(&self) -> bool {
        self.input_open.load(Ordering::Acquire)
    }

    pub(crate) fn is_output_open(&self) -> bool {
        self.output_open.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.is_input_open() && self.is_output_open()
    }

    pub(crate) fn shutdown_input(&self) {
        self.input_open.store(false, Ordering::Release);
    }

    pub(crate) fn shutdown_output(&self) {
        self.output_open.store(false, Ordering::Release);
    }

    /// Per-connection attribute storage. The guard must not be held
    /// across an await.
    pub(crate) fn attributes(&self) -> MutexGuard<'_, Attributes> {
        self.attributes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("input_open", &self.is_input_open())
            .field("output_open", &self.is_output_open())
            .finish()
    }
}
