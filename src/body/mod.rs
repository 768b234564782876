//! Response body model.
//!
//! A body is a declared [`BodyLength`] plus a one-shot source of byte
//! views. Opening the views consumes the body, which is what enforces
//! the single-iteration contract on application bodies: once the writer
//! has opened a body there is no way to open it again.

mod length;

pub use self::length::BodyLength;

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

type BoxStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// The payload of a [`Response`](crate::Response).
pub struct ResponseBody {
    kind: Kind,
    length: BodyLength,
}

enum Kind {
    Empty,
    Full(Bytes),
    Streamed(BoxStream),
}

impl ResponseBody {
    /// A body of zero bytes.
    pub fn empty() -> ResponseBody {
        ResponseBody {
            kind: Kind::Empty,
            length: BodyLength::Known(0),
        }
    }

    /// A body backed by a single in-memory buffer; length is known.
    pub fn full(data: impl Into<Bytes>) -> ResponseBody {
        let data = data.into();
        let length = BodyLength::Known(data.len() as u64);
        ResponseBody {
            kind: if data.is_empty() {
                Kind::Empty
            } else {
                Kind::Full(data)
            },
            length,
        }
    }

    /// A body backed by a stream of views; length unknown, so the
    /// response will be chunk-encoded for HTTP/1.1 clients.
    pub fn streamed<S>(stream: S) -> ResponseBody
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        ResponseBody {
            kind: Kind::Streamed(Box::pin(stream)),
            length: BodyLength::Unknown,
        }
    }

    /// A stream with a known total length; framed with
    /// `Content-Length`, and the writer enforces the declaration.
    pub fn sized<S>(stream: S, length: u64) -> ResponseBody
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        ResponseBody {
            kind: Kind::Streamed(Box::pin(stream)),
            length: BodyLength::Known(length),
        }
    }

    /// The declared length.
    pub fn length(&self) -> BodyLength {
        self.length
    }

    /// Open the body. Consumes `self`; a body can be opened once.
    pub(crate) fn open(self) -> BodyViews {
        BodyViews { kind: self.kind }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Empty => "Empty",
            Kind::Full(_) => "Full",
            Kind::Streamed(_) => "Streamed",
        };
        f.debug_struct("ResponseBody")
            .field("kind", &kind)
            .field("length", &self.length)
            .finish()
    }
}

impl From<Bytes> for ResponseBody {
    fn from(data: Bytes) -> ResponseBody {
        ResponseBody::full(data)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(data: Vec<u8>) -> ResponseBody {
        ResponseBody::full(Bytes::from(data))
    }
}

impl From<String> for ResponseBody {
    fn from(data: String) -> ResponseBody {
        ResponseBody::full(Bytes::from(data))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(data: &'static str) -> ResponseBody {
        ResponseBody::full(Bytes::from_static(data.as_bytes()))
    }
}

/// The opened, move-only view iterator of a [`ResponseBody`].
pub(crate) struct BodyViews {
    kind: Kind,
}

impl BodyViews {
    /// The next non-empty view, or `None` at the end of the body.
    pub(crate) async fn next(&mut self) -> Option<io::Result<Bytes>> {
        loop {
            match self.kind {
                Kind::Empty => return None,
                Kind::Full(ref mut data) => {
                    let data = std::mem::take(data);
                    self.kind = Kind::Empty;
                    return Some(Ok(data));
                }
                Kind::Streamed(ref mut stream) => {
                    match poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
                        Some(Ok(view)) if view.is_empty() => continue,
                        Some(result) => return Some(result),
                        None => {
                            self.kind = Kind::Empty;
                            return None;
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Debug for BodyViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyViews")
    }
}
