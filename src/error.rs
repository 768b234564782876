//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can fail with a candor
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while serving HTTP exchanges.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
    // A secondary failure hidden by this one; e.g. the channel error
    // produced by the stream shutdown an idle timeout performed.
    suppressed: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Malformed bytes in a request head or trailer block.
    Parse(Parse),
    /// The chunked decoder rejected the body framing.
    Decode,
    /// End-of-stream while a byte limit was still outstanding.
    UnexpectedEof,
    /// End-of-stream before the first request byte of an exchange.
    ClientAborted,
    /// The idle timer fired and shut down a stream.
    IdleConnection(Direction),
    /// No route matched the request target.
    RouteNotFound,
    /// A route matched, but no handler accepts the method.
    MethodNotAllowed,
    /// A route matched, but no handler consumes the Content-Type.
    UnsupportedMediaType,
    /// A route matched, but no handler produces an accepted type.
    NotAcceptable,
    /// HTTP/1.0 client rejected by configuration.
    UpgradeRequired,
    /// The server refused to transmit the application's response.
    ResponseRejected,
    /// An `io::Error` while reading or writing the channel.
    Io,
    /// A failure raised by a handler or action.
    Application,
    /// Misuse of the library by application code.
    User(User),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parse {
    RequestLine,
    Method,
    Target,
    Version,
    Header,
    Trailer,
    ContentLength,
    /// Request head or trailer block over the configured maximum.
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum User {
    /// A pattern could not be parsed.
    PatternSyntax,
    /// A media range given to a route builder could not be parsed.
    MediaRangeSyntax,
    /// A pattern collides with a registered one of another kind.
    RouteCollision,
    /// An equivalent pattern is already registered.
    DuplicatePattern,
    /// The named pattern is not registered.
    RouteNotRegistered,
    /// Operation on a dismissed byte source.
    SourceDismissed,
    /// `limit()` called while a limit is outstanding.
    LimitAlreadySet,
    /// `reset()` called while bytes remain or no limit is set.
    ResetNotAllowed,
    /// Successor requested from a live reader, or after end-of-stream.
    SuccessorDenied,
    /// Body shorter or longer than the declared Content-Length.
    BodyLengthMismatch,
    /// Application set Transfer-Encoding on a response body the server
    /// must frame itself.
    TransferEncodingSet,
    /// Content-Length and Transfer-Encoding on the same response.
    ConflictingFraming,
    /// A response body where the status forbids one.
    BodyForbidden,
    /// A second response write while one is in flight.
    InterleavedWrite,
    /// `start()` called on a server that is already running.
    ServerAlreadyRunning,
}

/// Which half of the channel an operation was using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: None,
                suppressed: None,
            }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn with_suppressed<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.suppressed = Some(cause.into());
        self
    }

    pub(crate) fn new_parse(what: Parse) -> Error {
        Error::new(Kind::Parse(what))
    }

    pub(crate) fn new_decode(detail: &'static str) -> Error {
        Error::new(Kind::Decode).with(detail)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_user(what: User) -> Error {
        Error::new(Kind::User(what))
    }

    pub(crate) fn new_idle(dir: Direction) -> Error {
        Error::new(Kind::IdleConnection(dir))
    }

    /// Wrap an application failure so it can flow out of a handler or
    /// action; the error-handler chain converts it into a fallback
    /// response.
    pub fn application<E>(cause: E) -> Error
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error::new(Kind::Application).with(cause)
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// Whether the request head or trailers were malformed.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Whether the request head or trailer block exceeded its size limit.
    pub fn is_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::TooLarge))
    }

    /// Whether the chunked decoder rejected the body.
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode)
    }

    /// Whether the channel ended while more bytes were expected.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self.inner.kind, Kind::UnexpectedEof)
    }

    /// Whether the client disconnected before sending a request.
    pub fn is_client_aborted(&self) -> bool {
        matches!(self.inner.kind, Kind::ClientAborted)
    }

    /// Whether the idle timer shut this connection down.
    pub fn is_idle_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::IdleConnection(_))
    }

    /// Whether this was caused by application misuse of the API.
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// Whether the error came from channel I/O.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Whether the error was raised by application code.
    pub fn is_application(&self) -> bool {
        matches!(self.inner.kind, Kind::Application)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::RequestLine) => "invalid request line",
            Kind::Parse(Parse::Method) => "invalid request method",
            Kind::Parse(Parse::Target) => "invalid request target",
            Kind::Parse(Parse::Version) => "invalid HTTP version",
            Kind::Parse(Parse::Header) => "invalid header",
            Kind::Parse(Parse::Trailer) => "invalid trailer",
            Kind::Parse(Parse::ContentLength) => "invalid Content-Length",
            Kind::Parse(Parse::TooLarge) => "request head too large",
            Kind::Decode => "invalid chunked body",
            Kind::UnexpectedEof => "end of stream while expecting bytes",
            Kind::ClientAborted => "client disconnected before sending a request",
            Kind::IdleConnection(Direction::Read) => "idle connection, read stream shut down",
            Kind::IdleConnection(Direction::Write) => "idle connection, write stream shut down",
            Kind::RouteNotFound => "no route matched the request target",
            Kind::MethodNotAllowed => "no handler for the request method",
            Kind::UnsupportedMediaType => "no handler consuming the request Content-Type",
            Kind::NotAcceptable => "no handler producing an accepted media type",
            Kind::UpgradeRequired => "HTTP/1.0 clients are not accepted",
            Kind::ResponseRejected => "response rejected by write policy",
            Kind::Io => "channel error",
            Kind::Application => "application error",
            Kind::User(User::PatternSyntax) => "invalid route pattern",
            Kind::User(User::MediaRangeSyntax) => "invalid media range",
            Kind::User(User::RouteCollision) => "route pattern collides with a registered route",
            Kind::User(User::DuplicatePattern) => "equivalent route already registered",
            Kind::User(User::RouteNotRegistered) => "route pattern not registered",
            Kind::User(User::SourceDismissed) => "byte source already dismissed",
            Kind::User(User::LimitAlreadySet) => "byte source limit already set",
            Kind::User(User::ResetNotAllowed) => "byte source reset requires an exhausted limit",
            Kind::User(User::SuccessorDenied) => {
                "successor requires a dismissed reader not at end-of-stream"
            }
            Kind::User(User::BodyLengthMismatch) => "body length does not match Content-Length",
            Kind::User(User::TransferEncodingSet) => {
                "Transfer-Encoding must be left to the server"
            }
            Kind::User(User::ConflictingFraming) => {
                "Content-Length and Transfer-Encoding on the same message"
            }
            Kind::User(User::BodyForbidden) => "response status forbids a body",
            Kind::User(User::InterleavedWrite) => "a response write is already in flight",
            Kind::User(User::ServerAlreadyRunning) => "server is already running",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("candor::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        if let Some(ref suppressed) = self.inner.suppressed {
            f.field(&format_args!("suppressed: {}", suppressed));
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::new_io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_size_is_one_pointer() {
        assert_eq!(
            std::mem::size_of::<Error>(),
            std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn predicates() {
        assert!(Error::new_parse(Parse::Header).is_parse());
        assert!(Error::new_parse(Parse::TooLarge).is_too_large());
        assert!(Error::new(Kind::UnexpectedEof).is_unexpected_eof());
        assert!(Error::new_idle(Direction::Read).is_idle_timeout());
        assert!(Error::new_user(User::InterleavedWrite).is_user());
    }

    #[test]
    fn io_cause_is_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = Error::new_io(io);
        assert!(err.is_io());
        assert!(err.source().is_some());
    }
}
