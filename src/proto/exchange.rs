//! The per-connection exchange state machine.
//!
//! One [`Connection`] per accepted channel, serving exchanges in a loop:
//! parse the head, decide body framing, dispatch through the before
//! chain into the route handler, write the (possibly fallback) response,
//! then either hand the leftovers to a successor reader or close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use super::channel::ChannelState;
use super::parse::HeadParser;
use super::reader::ChannelReader;
use super::respond::WriteContext;
use super::timeout::IdleTimer;
use super::writer::{ChannelWriter, SharedWriter, WriteOutcome};
use crate::config::HttpServerOptions;
use crate::error::{Error, Kind, Parse};
use crate::event::EventSink;
use crate::handler::{Chain, Terminal};
use crate::media::{parse_accept, MediaType};
use crate::request::{Request, RequestBody};
use crate::response::Response;
use crate::route::Target;
use crate::server::AppRegistry;
use crate::status::StatusCode;

/// Consecutive 4xx/5xx responses on this connection; lives in the
/// channel's attributes.
#[derive(Debug, Default, Clone, Copy)]
struct ErrorResponses(u32);

enum Flow {
    Next,
    Close,
}

pub(crate) struct Connection {
    reader: Option<ChannelReader>,
    writer: SharedWriter,
    channel: Arc<ChannelState>,
    config: Arc<HttpServerOptions>,
    app: Arc<AppRegistry>,
    running: Arc<AtomicBool>,
    exchange_count: u64,
}

impl Connection {
    pub(crate) fn open<IO>(
        io: IO,
        config: Arc<HttpServerOptions>,
        app: Arc<AppRegistry>,
        events: Arc<dyn EventSink>,
        running: Arc<AtomicBool>,
    ) -> Connection
    where
        IO: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let channel = Arc::new(ChannelState::new());
        let timer = Arc::new(IdleTimer::new(config.timeout_idle_connection));
        let reader = ChannelReader::new(
            Box::new(read_half),
            Arc::clone(&timer),
            Arc::clone(&channel),
        );
        let writer = Arc::new(tokio::sync::Mutex::new(ChannelWriter::new(
            Box::new(write_half),
            timer,
            Arc::clone(&channel),
            events,
            &config,
        )));
        Connection {
            reader: Some(reader),
            writer,
            channel,
            config,
            app,
            running,
            exchange_count: 0,
        }
    }

    /// Flag graceful shutdown reads to tell an idle connection (no
    /// request bytes yet) from an active one.
    pub(crate) fn started_flag(&self) -> Arc<AtomicBool> {
        match self.reader.as_ref() {
            Some(reader) => reader.started_flag(),
            None => Arc::new(AtomicBool::new(true)),
        }
    }

    /// Run exchanges until the connection is done.
    pub(crate) async fn serve(mut self) {
        loop {
            match self.exchange().await {
                Ok(Flow::Next) => continue,
                Ok(Flow::Close) => break,
                Err(e) => {
                    debug!("connection ending: {}", e);
                    break;
                }
            }
        }
        self.writer.lock().await.dismiss().await;
        trace!("connection closed after {} exchange(s)", self.exchange_count);
    }

    async fn exchange(&mut self) -> Result<Flow, Error> {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => return Ok(Flow::Close),
        };
        self.writer.lock().await.begin_exchange();
        self.exchange_count += 1;

        // ===== reading_head =====
        let parsed = {
            let mut parser = HeadParser::new(&mut reader, self.config.max_request_head_size);
            match parser.request_line().await {
                Ok(line) => parser.headers().await.map(|headers| (line, headers)),
                Err(e) => Err(e),
            }
        };
        let (line, headers) = match parsed {
            Ok(parts) => parts,
            Err(e) => return self.early_failure(e, reader).await,
        };

        // ===== body framing decision =====
        let content_length = match headers.content_length() {
            Ok(value) => value,
            Err(e) => return self.early_failure(e, reader).await,
        };
        let chunked = headers.is_chunked();
        if headers.contains("Transfer-Encoding") && !chunked {
            let e = Error::new_parse(Parse::Header).with("unsupported transfer encoding");
            return self.early_failure(e, reader).await;
        }
        let target = match Target::parse(&line.target) {
            Ok(target) => target,
            Err(e) => return self.early_failure(e, reader).await,
        };

        let body = if chunked {
            // chunked wins over any Content-Length
            RequestBody::chunked(reader, self.config.max_request_trailers_size)
        } else if let Some(n) = content_length.filter(|&n| n > 0) {
            reader.limit(n)?;
            RequestBody::sized(reader)
        } else {
            RequestBody::empty(reader)
        };

        let request = Request::new(line.method, line.version, headers, target, body.clone());
        trace!(
            "exchange {}: {} {}",
            self.exchange_count,
            request.method(),
            request.target().raw()
        );

        if request.version().is_at_least_1_1()
            && request.headers().has_token("Expect", "100-continue")
        {
            if self.config.immediately_continue_expect_100 {
                let mut writer = self.writer.lock().await;
                writer
                    .write_interim(Response::continue_100(), request.version())
                    .await?;
            } else {
                body.defer_continue(Arc::clone(&self.writer), request.version())
                    .await;
            }
        }

        // ===== processing =====
        let produced = if self.config.reject_clients_using_http_1_0
            && !request.version().is_at_least_1_1()
        {
            Err(Error::new(Kind::UpgradeRequired))
        } else {
            self.dispatch(request.clone()).await
        };
        let response = match produced {
            Ok(response) => response,
            Err(e) if e.is_idle_timeout() || e.is_unexpected_eof() => {
                return Err(e);
            }
            Err(e) => self.resolve_error(e, Some(&request)).await,
        };

        // ===== writing =====
        let response = self.apply_after_actions(&request, response).await;
        let ctx = WriteContext {
            req_version: Some(request.version()),
            req_method: Some(request.method().to_owned()),
            req_wants_close: request.headers().has_token("Connection", "close"),
            input_open: self.channel.is_input_open(),
            server_running: self.running.load(Ordering::Acquire),
        };
        let outcome = match self.write_final(response, &ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if self.writer.lock().await.is_dismissed() {
                    // bytes may already be on the wire; nothing to salvage
                    return Err(e);
                }
                warn!("response rejected, attempting fallback: {}", e);
                let fallback = self.resolve_error(e, Some(&request)).await;
                self.write_final(fallback, &ctx).await?
            }
        };

        // ===== error-response counter =====
        let too_many_errors = {
            let mut attrs = self.channel.attributes();
            let prior = attrs.get::<ErrorResponses>().copied().unwrap_or_default().0;
            let count = if outcome.status.is_error() { prior + 1 } else { 0 };
            attrs.insert(ErrorResponses(count));
            count > self.config.max_error_responses
        };
        if too_many_errors {
            debug!("too many consecutive error responses; closing");
            return Ok(Flow::Close);
        }
        if outcome.close {
            return Ok(Flow::Close);
        }

        // ===== next =====
        let mut reader = match body.finish().await {
            Ok(Some(reader)) => reader,
            Ok(None) => return Ok(Flow::Close),
            Err(e) => {
                debug!("could not drain request body: {}", e);
                return Ok(Flow::Close);
            }
        };
        reader.dismiss();
        if reader.is_eos()
            || !self.channel.is_open()
            || !self.running.load(Ordering::Acquire)
        {
            return Ok(Flow::Close);
        }
        self.reader = Some(reader.into_successor()?);
        Ok(Flow::Next)
    }

    /// A failure before the request head existed. Client aborts and
    /// idle timeouts end the exchange silently; parse failures get an
    /// error response, and the connection always closes.
    async fn early_failure(&mut self, err: Error, mut reader: ChannelReader) -> Result<Flow, Error> {
        reader.dismiss();
        if err.is_client_aborted() {
            debug!("client disconnected before sending a request");
            return Ok(Flow::Close);
        }
        if err.is_idle_timeout() {
            debug!("idle connection; closing without a response");
            return Ok(Flow::Close);
        }
        if err.is_io() {
            return Err(err);
        }
        let response = self.resolve_error(err, None).await;
        let ctx = WriteContext::early(
            self.channel.is_input_open(),
            self.running.load(Ordering::Acquire),
        );
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_response(response, &ctx).await {
            debug!("could not write early error response: {}", e);
        }
        Ok(Flow::Close)
    }

    async fn write_final(
        &self,
        response: Response,
        ctx: &WriteContext,
    ) -> Result<WriteOutcome, Error> {
        let mut writer = self.writer.lock().await;
        writer.write_response(response, ctx).await
    }

    /// Before-action chain, terminating in route lookup, handler
    /// selection and the handler call.
    async fn dispatch(&self, request: Request) -> Result<Response, Error> {
        let before = self.app.before.matching(request.target().decoded_segments());
        let app = Arc::clone(&self.app);
        let terminal: Terminal = Arc::new(move |req: Request| {
            let app = Arc::clone(&app);
            let fut: crate::handler::BoxFuture<crate::Result<Response>> =
                Box::pin(async move {
                    let matched = app.routes.lookup(req.target())?;
                    req.bind_params(matched.params_raw, matched.params_decoded);
                    let content_type = req
                        .headers()
                        .get("Content-Type")
                        .and_then(MediaType::parse);
                    let accept: Vec<MediaType> = req
                        .headers()
                        .get_all("Accept")
                        .flat_map(parse_accept)
                        .collect();
                    let handler =
                        matched
                            .route
                            .select(req.method(), content_type.as_ref(), &accept)?;
                    handler.call(req).await
                });
            fut
        });
        Chain::new(before, terminal).proceed(request).await
    }

    async fn apply_after_actions(&self, request: &Request, mut response: Response) -> Response {
        let actions = self.app.after.matching(request.target().decoded_segments());
        for action in actions {
            match action.apply(request.clone(), response).await {
                Ok(next) => response = next,
                Err(e) => {
                    warn!("after-action failed: {}", e);
                    response = Response::internal_server_error();
                }
            }
        }
        response
    }

    /// Run the error-handler chain up to the configured attempt cap,
    /// falling back to the built-in status mapping.
    async fn resolve_error(&self, err: Error, request: Option<&Request>) -> Response {
        let err = Arc::new(err);
        let handlers: Vec<_> = self
            .app
            .error_handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut attempts = 0;
        for handler in handlers {
            if attempts >= self.config.max_error_recovery_attempts {
                break;
            }
            attempts += 1;
            match handler.handle(Arc::clone(&err), request.cloned()).await {
                Ok(response) => return response,
                Err(next) => warn!("error handler failed: {}", next),
            }
        }
        default_response(&err)
    }
}

/// The built-in error-to-status mapping.
fn default_response(err: &Error) -> Response {
    match err.kind() {
        Kind::Parse(Parse::TooLarge) => Response::payload_too_large(),
        Kind::Parse(_) | Kind::Decode | Kind::UnexpectedEof => Response::bad_request(),
        Kind::RouteNotFound => Response::not_found(),
        Kind::MethodNotAllowed => Response::status_only(StatusCode::METHOD_NOT_ALLOWED),
        Kind::UnsupportedMediaType => Response::status_only(StatusCode::UNSUPPORTED_MEDIA_TYPE),
        Kind::NotAcceptable => Response::status_only(StatusCode::NOT_ACCEPTABLE),
        Kind::UpgradeRequired => Response::upgrade_required(),
        Kind::IdleConnection(_) => Response::request_timeout(),
        Kind::ClientAborted
        | Kind::ResponseRejected
        | Kind::Io
        | Kind::Application
        | Kind::User(_) => Response::internal_server_error(),
    }
}
