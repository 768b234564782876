//! Serializes responses onto the channel's write half.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Buf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use super::channel::ChannelState;
use super::date;
use super::encode::ChunkedEncoder;
use super::respond::{self, Finalized, ResponseFraming, WriteContext};
use super::timeout::IdleTimer;
use crate::config::HttpServerOptions;
use crate::error::{Direction, Error, Kind, User};
use crate::event::{EventSink, ResponseStats, ServerEvent};
use crate::headers::{write_latin1, Headers};
use crate::response::Response;
use crate::status::StatusCode;
use crate::version::HttpVersion;

type BoxWrite = Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>;

/// The per-connection writer, shared between the exchange (final
/// responses) and the request body (deferred `100 Continue`).
pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<ChannelWriter>>;

/// Result of a transmitted final response.
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    pub(crate) status: StatusCode,
    pub(crate) close: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Ready,
    Writing,
    Dismissed,
}

/// Owns the write half. One response is in flight at a time; writes are
/// wrapped in the idle timer; a failed write dismisses the writer and
/// shuts the output stream down.
pub(crate) struct ChannelWriter {
    io: BoxWrite,
    timer: Arc<IdleTimer>,
    channel: Arc<ChannelState>,
    events: Arc<dyn EventSink>,
    discard_rejected_informational: bool,
    add_date_header: bool,
    state: WriteState,
    wrote_100: bool,
    rejected_100s: u32,
    bytes_written: u64,
}

impl ChannelWriter {
    pub(crate) fn new(
        io: BoxWrite,
        timer: Arc<IdleTimer>,
        channel: Arc<ChannelState>,
        events: Arc<dyn EventSink>,
        config: &HttpServerOptions,
    ) -> ChannelWriter {
        ChannelWriter {
            io,
            timer,
            channel,
            events,
            discard_rejected_informational: config.discard_rejected_informational,
            add_date_header: config.add_date_header,
            state: WriteState::Ready,
            wrote_100: false,
            rejected_100s: 0,
            bytes_written: 0,
        }
    }

    /// Reset the per-exchange bookkeeping for a fresh exchange.
    pub(crate) fn begin_exchange(&mut self) {
        self.wrote_100 = false;
        self.rejected_100s = 0;
        self.bytes_written = 0;
    }

    pub(crate) fn is_dismissed(&self) -> bool {
        self.state == WriteState::Dismissed
    }

    /// Write an interim (1xx) response, applying the suppression rules.
    /// `Ok(false)` means the response was dropped rather than written.
    pub(crate) async fn write_interim(
        &mut self,
        rsp: Response,
        req_version: HttpVersion,
    ) -> Result<bool, Error> {
        debug_assert!(rsp.is_informational());
        self.ensure_writable()?;

        if !req_version.is_at_least_1_1() {
            return if self.discard_rejected_informational {
                debug!("discarding interim response to an HTTP/1.0 client");
                Ok(false)
            } else {
                Err(Error::new(Kind::ResponseRejected)
                    .with("interim response to an HTTP/1.0 client"))
            };
        }
        if rsp.status() == StatusCode::CONTINUE {
            if self.wrote_100 {
                self.rejected_100s += 1;
                if self.rejected_100s == 1 {
                    info!("discarding repeated 100 Continue");
                } else {
                    warn!("discarding repeated 100 Continue ({})", self.rejected_100s);
                }
                return Ok(false);
            }
            self.wrote_100 = true;
        }

        self.state = WriteState::Writing;
        let mut head = Vec::with_capacity(64);
        render_head(&rsp, &mut head);
        let result = self.put(&head[..]).await;
        self.finish_write(result).await?;
        trace!("interim response written; status={}", rsp.status().as_u16());
        Ok(true)
    }

    /// Run the response processor and transmit a final response.
    pub(crate) async fn write_response(
        &mut self,
        rsp: Response,
        ctx: &WriteContext,
    ) -> Result<WriteOutcome, Error> {
        self.ensure_writable()?;
        if rsp.is_informational() {
            return Err(
                Error::new(Kind::ResponseRejected).with("interim response as a final response")
            );
        }

        let started = Instant::now();
        let Finalized {
            mut response,
            framing,
            close,
        } = respond::finalize(rsp, ctx)?;
        if self.add_date_header && !response.headers().contains("Date") {
            response.headers_mut().append("Date", date::http_date());
        }

        self.state = WriteState::Writing;
        let status = response.status();
        let result = self.transmit(response, framing).await;
        self.finish_write(result).await?;

        let stats = ResponseStats {
            status,
            bytes_written: self.bytes_written,
            elapsed: started.elapsed(),
        };
        debug!(
            "response sent; status={} bytes={}",
            status.as_u16(),
            stats.bytes_written
        );
        self.events.dispatch(ServerEvent::ResponseSent(stats));
        Ok(WriteOutcome { status, close })
    }

    /// Dismiss the writer; later writes fail with a state error.
    pub(crate) async fn dismiss(&mut self) {
        if self.state != WriteState::Dismissed {
            self.state = WriteState::Dismissed;
            self.channel.shutdown_output();
            let _ = self.io.shutdown().await;
        }
    }

    fn ensure_writable(&self) -> Result<(), Error> {
        match self.state {
            WriteState::Writing => Err(Error::new_user(User::InterleavedWrite)),
            WriteState::Dismissed => {
                Err(Error::new(Kind::ResponseRejected).with("output stream is shut"))
            }
            WriteState::Ready if !self.channel.is_output_open() => {
                Err(Error::new(Kind::ResponseRejected).with("output stream is shut"))
            }
            WriteState::Ready => Ok(()),
        }
    }

    async fn finish_write(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match result {
            Ok(()) => {
                self.state = WriteState::Ready;
                Ok(())
            }
            Err(e) => {
                self.dismiss().await;
                Err(e)
            }
        }
    }

    async fn transmit(&mut self, response: Response, framing: ResponseFraming) -> Result<(), Error> {
        let mut head = Vec::with_capacity(256);
        render_head(&response, &mut head);
        self.put(&head[..]).await?;

        let Response {
            body, trailers, ..
        } = response;
        match framing {
            ResponseFraming::Sized(declared) => {
                let mut views = body.open();
                let mut actual: u64 = 0;
                while let Some(view) = views.next().await {
                    let view = view.map_err(Error::new_io)?;
                    actual += view.len() as u64;
                    if actual > declared {
                        return Err(Error::new_user(User::BodyLengthMismatch));
                    }
                    self.put(view).await?;
                }
                if actual != declared {
                    return Err(Error::new_user(User::BodyLengthMismatch));
                }
            }
            ResponseFraming::CloseDelimited => {
                let mut views = body.open();
                while let Some(view) = views.next().await {
                    self.put(view.map_err(Error::new_io)?).await?;
                }
            }
            ResponseFraming::Chunked => {
                let mut encoder = ChunkedEncoder::new(body.open());
                while let Some(piece) = encoder.next().await {
                    self.put(piece.map_err(Error::new_io)?).await?;
                }
                // the trailer block (or a single CRLF) closes the body
                let mut tail = Vec::new();
                if let Some(trailers) = trailers {
                    render_fields(&trailers, &mut tail);
                }
                tail.extend_from_slice(b"\r\n");
                self.put(&tail[..]).await?;
            }
        }

        match self.timer.guard(Direction::Write, self.io.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(io_err)) => Err(self.channel_error(io_err)),
            Err(idle) => Err(idle),
        }
    }

    /// One guarded write of a full buffer.
    async fn put(&mut self, mut buf: impl Buf) -> Result<(), Error> {
        let len = buf.remaining() as u64;
        let result = self
            .timer
            .guard(Direction::Write, self.io.write_all_buf(&mut buf))
            .await;
        match result {
            Ok(Ok(())) => {
                self.bytes_written += len;
                Ok(())
            }
            Ok(Err(io_err)) => Err(self.channel_error(io_err)),
            Err(idle) => Err(idle),
        }
    }

    /// A channel error caused by a fired timer's stream shutdown reports
    /// as the timeout; the channel error rides along as a secondary.
    fn channel_error(&self, io_err: std::io::Error) -> Error {
        if self.timer.has_fired() {
            Error::new_idle(Direction::Write).with_suppressed(io_err)
        } else {
            Error::new_io(io_err)
        }
    }
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("state", &self.state)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

/// `HTTP/1.1 <code> <reason>\r\n` + headers + blank line. The version
/// is always 1.1, the highest this server conforms to.
fn render_head(rsp: &Response, dst: &mut Vec<u8>) {
    dst.extend_from_slice(b"HTTP/1.1 ");
    let mut buf = itoa::Buffer::new();
    dst.extend_from_slice(buf.format(rsp.status().as_u16()).as_bytes());
    dst.push(b' ');
    match rsp.reason.as_deref() {
        Some(reason) => write_latin1(reason, dst),
        None => dst
            .extend_from_slice(rsp.status().canonical_reason().unwrap_or("Unknown").as_bytes()),
    }
    dst.extend_from_slice(b"\r\n");
    render_fields(rsp.headers(), dst);
    dst.extend_from_slice(b"\r\n");
}

fn render_fields(fields: &Headers, dst: &mut Vec<u8>) {
    for (name, value) in fields.iter() {
        write_latin1(name, dst);
        dst.extend_from_slice(b": ");
        write_latin1(value, dst);
        dst.extend_from_slice(b"\r\n");
    }
}
