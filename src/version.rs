//! HTTP version, parsed from the request line.

use std::fmt;

/// An HTTP protocol version as carried by the request line.
///
/// Only the `major.minor` shape of HTTP/1 is representable; requests
/// claiming other versions still parse, and the caller decides what to
/// do with them. Responses produced by this library are always written
/// as `HTTP/1.1`, the highest version it conforms to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HttpVersion {
    /// The digits before the dot.
    pub major: u16,
    /// The digits after the dot.
    pub minor: u16,
}

impl HttpVersion {
    /// `HTTP/1.0`
    pub const HTTP_10: HttpVersion = HttpVersion { major: 1, minor: 0 };
    /// `HTTP/1.1`
    pub const HTTP_11: HttpVersion = HttpVersion { major: 1, minor: 1 };

    /// True for HTTP/1.1 and anything later.
    ///
    /// Persistent connections, chunked framing and interim responses
    /// are only offered to clients at or above this version.
    pub fn is_at_least_1_1(&self) -> bool {
        *self >= HttpVersion::HTTP_11
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}
