//! Requests and request bodies.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use crate::attributes::Attributes;
use crate::error::{Error, Parse, User};
use crate::headers::Headers;
use crate::proto::decode::ChunkedDecoder;
use crate::proto::parse;
use crate::proto::reader::ChannelReader;
use crate::proto::writer::SharedWriter;
use crate::response::Response;
use crate::route::Target;
use crate::version::HttpVersion;

/// Where trailer parsing stands for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailerStatus {
    /// The request is not chunked; there are no trailers to parse.
    NotApplicable,
    /// Chunked request; the trailer block has not been parsed yet.
    NotStarted,
    /// Trailer parsing was attempted and failed.
    Failed,
    /// Trailers parsed (possibly to an empty set).
    Done,
}

/// An inbound request, cheap to clone and share.
///
/// The head is immutable; the body is a shared handle the handler (and
/// later the exchange, for cleanup) read from in turn.
#[derive(Clone)]
pub struct Request {
    shared: Arc<RequestShared>,
}

struct RequestShared {
    method: String,
    version: HttpVersion,
    headers: Headers,
    target: Target,
    body: RequestBody,
    params: Mutex<Params>,
    attributes: Mutex<Attributes>,
}

#[derive(Default)]
struct Params {
    raw: HashMap<String, String>,
    decoded: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(
        method: String,
        version: HttpVersion,
        headers: Headers,
        target: Target,
        body: RequestBody,
    ) -> Request {
        Request {
            shared: Arc::new(RequestShared {
                method,
                version,
                headers,
                target,
                body,
                params: Mutex::new(Params::default()),
                attributes: Mutex::new(Attributes::new()),
            }),
        }
    }

    /// The request method, as received.
    pub fn method(&self) -> &str {
        &self.shared.method
    }

    /// The HTTP version from the request line.
    pub fn version(&self) -> HttpVersion {
        self.shared.version
    }

    /// The request headers.
    pub fn headers(&self) -> &Headers {
        &self.shared.headers
    }

    /// The parsed request target.
    pub fn target(&self) -> &Target {
        &self.shared.target
    }

    /// The body handle.
    pub fn body(&self) -> &RequestBody {
        &self.shared.body
    }

    /// A path parameter bound by the matched route, percent-decoded.
    pub fn path_param(&self, name: &str) -> Option<String> {
        self.params().decoded.get(name).cloned()
    }

    /// A path parameter with its original percent-encoding.
    pub fn path_param_raw(&self, name: &str) -> Option<String> {
        self.params().raw.get(name).cloned()
    }

    /// Request trailers; parses them on first call (draining any unread
    /// body first). `None` for non-chunked requests and empty blocks.
    pub async fn trailers(&self) -> Result<Option<Headers>, Error> {
        self.shared.body.trailers().await
    }

    /// Request-scoped attribute storage. The guard must not be held
    /// across an await.
    pub fn attributes(&self) -> MutexGuard<'_, Attributes> {
        self.shared
            .attributes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn params(&self) -> MutexGuard<'_, Params> {
        self.shared.params.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn bind_params(
        &self,
        raw: HashMap<String, String>,
        decoded: HashMap<String, String>,
    ) {
        let mut params = self.params();
        params.raw = raw;
        params.decoded = decoded;
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.shared.method)
            .field("target", &self.shared.target.raw())
            .field("version", &self.shared.version)
            .field("headers", &self.shared.headers)
            .finish()
    }
}

/// Shared handle to an inbound request body.
///
/// Reading is sequential; views come straight off the channel (sized
/// bodies) or out of the chunked decoder. The connection task and the
/// handler never read concurrently; the handler runs to completion
/// before the exchange reclaims the channel.
#[derive(Clone)]
pub struct RequestBody {
    core: Arc<tokio::sync::Mutex<BodyCore>>,
}

struct BodyCore {
    framing: Framing,
    reader: Option<ChannelReader>,
    trailer_status: TrailerStatus,
    trailers: Option<Headers>,
    max_trailers: usize,
    /// Deferred `100 Continue`, sent on the first body read.
    expect_continue: Option<(SharedWriter, HttpVersion)>,
}

enum Framing {
    Empty,
    Sized,
    Chunked(ChunkedDecoder),
}

impl RequestBody {
    /// A request without a message body.
    pub(crate) fn empty(reader: ChannelReader) -> RequestBody {
        RequestBody::build(Framing::Empty, reader, TrailerStatus::NotApplicable, 0)
    }

    /// A `Content-Length` body; the reader must already be limited.
    pub(crate) fn sized(reader: ChannelReader) -> RequestBody {
        debug_assert!(reader.limit_remaining().is_some());
        RequestBody::build(Framing::Sized, reader, TrailerStatus::NotApplicable, 0)
    }

    /// A chunked body; trailers become parseable once it is drained.
    pub(crate) fn chunked(reader: ChannelReader, max_trailers: usize) -> RequestBody {
        RequestBody::build(
            Framing::Chunked(ChunkedDecoder::new()),
            reader,
            TrailerStatus::NotStarted,
            max_trailers,
        )
    }

    fn build(
        framing: Framing,
        reader: ChannelReader,
        trailer_status: TrailerStatus,
        max_trailers: usize,
    ) -> RequestBody {
        RequestBody {
            core: Arc::new(tokio::sync::Mutex::new(BodyCore {
                framing,
                reader: Some(reader),
                trailer_status,
                trailers: None,
                max_trailers,
                expect_continue: None,
            })),
        }
    }

    /// Arm a deferred `100 Continue` to be written before the first
    /// body byte is pulled.
    pub(crate) async fn defer_continue(&self, writer: SharedWriter, version: HttpVersion) {
        self.core.lock().await.expect_continue = Some((writer, version));
    }

    /// The next body view, or `None` at the end of the body.
    pub async fn read(&self) -> Result<Option<Bytes>, Error> {
        let mut core = self.core.lock().await;
        core.maybe_continue().await?;
        core.next_view().await
    }

    /// The entire remaining body as one buffer.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        let mut core = self.core.lock().await;
        core.maybe_continue().await?;
        let mut all = BytesMut::new();
        while let Some(view) = core.next_view().await? {
            all.extend_from_slice(&view);
        }
        Ok(all.freeze())
    }

    /// The entire remaining body as UTF-8 text (lossy).
    pub async fn text(&self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Where trailer parsing currently stands.
    pub async fn trailer_status(&self) -> TrailerStatus {
        self.core.lock().await.trailer_status
    }

    /// Parse and return the trailers; see [`Request::trailers`].
    pub async fn trailers(&self) -> Result<Option<Headers>, Error> {
        let mut core = self.core.lock().await;
        match core.trailer_status {
            TrailerStatus::NotApplicable => Ok(None),
            TrailerStatus::Done => Ok(core.trailers.clone()),
            TrailerStatus::Failed => Err(Error::new_parse(Parse::Trailer)),
            TrailerStatus::NotStarted => {
                core.maybe_continue().await?;
                while core.next_view().await?.is_some() {}
                core.parse_trailers().await
            }
        }
    }

    /// Drain whatever the application left unread, swallow undrained
    /// trailers (and the terminal CRLF), and reclaim the reader for the
    /// next exchange.
    ///
    /// Returns `None` when the connection cannot be reused: the client
    /// was promised a `100 Continue` that never went out, so whether a
    /// body follows is unknowable.
    pub(crate) async fn finish(&self) -> Result<Option<ChannelReader>, Error> {
        let mut core = self.core.lock().await;
        if core.expect_continue.take().is_some() {
            return Ok(None);
        }
        while core.next_view().await?.is_some() {}
        match core.framing {
            Framing::Sized => {
                if let Some(reader) = core.reader.as_mut() {
                    reader.reset()?;
                }
            }
            Framing::Chunked(_) => {
                if core.trailer_status == TrailerStatus::NotStarted {
                    core.parse_trailers().await?;
                }
            }
            Framing::Empty => {}
        }
        Ok(core.reader.take())
    }
}

impl BodyCore {
    async fn maybe_continue(&mut self) -> Result<(), Error> {
        if let Some((writer, version)) = self.expect_continue.take() {
            let mut writer = writer.lock().await;
            writer
                .write_interim(Response::continue_100(), version)
                .await?;
        }
        Ok(())
    }

    async fn next_view(&mut self) -> Result<Option<Bytes>, Error> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Err(Error::new_user(User::SourceDismissed)),
        };
        match &mut self.framing {
            Framing::Empty => Ok(None),
            Framing::Sized => reader.next().await,
            Framing::Chunked(decoder) => decoder.next(reader).await,
        }
    }

    async fn parse_trailers(&mut self) -> Result<Option<Headers>, Error> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Err(Error::new_user(User::SourceDismissed)),
        };
        match parse::parse_trailers(reader, self.max_trailers).await {
            Ok(block) => {
                self.trailer_status = TrailerStatus::Done;
                self.trailers = if block.is_empty() { None } else { Some(block) };
                Ok(self.trailers.clone())
            }
            Err(e) => {
                self.trailer_status = TrailerStatus::Failed;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestBody")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::channel::ChannelState;
    use crate::proto::timeout::IdleTimer;
    use std::time::Duration;

    fn reader_over(bytes: &'static [u8]) -> ChannelReader {
        ChannelReader::new(
            Box::new(bytes),
            Arc::new(IdleTimer::new(Duration::from_secs(5))),
            Arc::new(ChannelState::new()),
        )
    }

    #[tokio::test]
    async fn sized_body_delivers_exactly_n_then_empty() {
        let mut reader = reader_over(b"12345tail");
        reader.limit(5).unwrap();
        let body = RequestBody::sized(reader);
        assert_eq!(body.bytes().await.unwrap(), Bytes::from("12345"));
        assert!(body.read().await.unwrap().is_none());
        // leftover belongs to the next exchange
        let mut reader = body.finish().await.unwrap().unwrap();
        assert_eq!(&reader.next().await.unwrap().unwrap()[..], b"tail");
    }

    #[tokio::test]
    async fn chunked_body_and_trailers() {
        let body = RequestBody::chunked(
            reader_over(b"5\r\nabcde\r\n3\r\nfgh\r\n0\r\nX-Sum: ok\r\n\r\nnext"),
            8_000,
        );
        assert_eq!(body.text().await.unwrap(), "abcdefgh");
        assert_eq!(body.trailer_status().await, TrailerStatus::NotStarted);
        let trailers = body.trailers().await.unwrap().unwrap();
        assert_eq!(trailers.get("x-sum"), Some("ok"));
        assert_eq!(body.trailer_status().await, TrailerStatus::Done);

        let mut reader = body.finish().await.unwrap().unwrap();
        assert_eq!(&reader.next().await.unwrap().unwrap()[..], b"next");
    }

    #[tokio::test]
    async fn finish_discards_unread_body_and_trailers() {
        let body = RequestBody::chunked(reader_over(b"2\r\nhi\r\n0\r\n\r\nnext"), 8_000);
        // application never touched the body
        let mut reader = body.finish().await.unwrap().unwrap();
        assert_eq!(&reader.next().await.unwrap().unwrap()[..], b"next");
    }

    #[tokio::test]
    async fn trailers_drain_the_body_first() {
        let body = RequestBody::chunked(reader_over(b"2\r\nhi\r\n0\r\n\r\n"), 8_000);
        assert!(body.trailers().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_body_reads_nothing() {
        let body = RequestBody::empty(reader_over(b"GET / HTTP/1.1\r\n"));
        assert!(body.read().await.unwrap().is_none());
        assert_eq!(body.trailer_status().await, TrailerStatus::NotApplicable);
        assert!(body.trailers().await.unwrap().is_none());
        let mut reader = body.finish().await.unwrap().unwrap();
        assert_eq!(&reader.next().await.unwrap().unwrap()[..], b"GET / HTTP/1.1\r\n");
    }
}
