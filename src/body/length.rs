//! Declared body length.

/// The length a response body declares up front.
///
/// A known length becomes `Content-Length`; an unknown length makes the
/// response processor apply chunked transfer encoding (or, for HTTP/1.0
/// clients, close-delimited framing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// The body will yield exactly this many bytes.
    Known(u64),
    /// The producer cannot tell in advance.
    Unknown,
}

impl BodyLength {
    /// The exact count, if declared.
    pub fn known(&self) -> Option<u64> {
        match *self {
            BodyLength::Known(n) => Some(n),
            BodyLength::Unknown => None,
        }
    }

    /// True for a declared length of zero.
    pub fn is_empty(&self) -> bool {
        matches!(*self, BodyLength::Known(0))
    }
}
