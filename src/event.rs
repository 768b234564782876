//! Server lifecycle and response events.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, trace};

use crate::status::StatusCode;

/// Facts about one transmitted final response.
#[derive(Debug, Clone)]
pub struct ResponseStats {
    /// Status of the final response.
    pub status: StatusCode,
    /// Bytes put on the wire for this response, head included.
    pub bytes_written: u64,
    /// Time from beginning the write until the last byte was flushed.
    pub elapsed: Duration,
}

/// Events emitted by the server core.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and accepting.
    Started {
        /// Local address of the listener.
        addr: SocketAddr,
    },
    /// The listener is closed and all children have completed or been
    /// closed.
    Stopped,
    /// A final response was fully written to a client.
    ResponseSent(ResponseStats),
}

/// Receives [`ServerEvent`]s.
///
/// Dispatch happens on the connection task that produced the event;
/// implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one event.
    fn dispatch(&self, event: ServerEvent);
}

/// Default sink, forwarding events to `tracing` at debug level.
pub(crate) struct TraceSink;

impl EventSink for TraceSink {
    fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::Started { addr } => debug!("server started on {}", addr),
            ServerEvent::Stopped => debug!("server stopped"),
            ServerEvent::ResponseSent(stats) => trace!(
                "response sent; status={} bytes={} elapsed={:?}",
                stats.status.as_u16(),
                stats.bytes_written,
                stats.elapsed
            ),
        }
    }
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TraceSink")
    }
}
