//! Chunked transfer encoding.

use std::fmt;
use std::io;

use bytes::buf::Chain;
use bytes::{Buf, Bytes};

use crate::body::BodyViews;

type StaticBuf = &'static [u8];

/// Wraps an opened response body, framing every non-empty view as one
/// chunk and finishing with the last-chunk.
///
/// The trailer block (or the single closing CRLF) after the last-chunk
/// is the channel writer's job, not the encoder's. Dropping the encoder
/// drops the upstream body with it.
pub(crate) struct ChunkedEncoder {
    upstream: BodyViews,
    sent_last: bool,
}

impl ChunkedEncoder {
    pub(crate) fn new(upstream: BodyViews) -> ChunkedEncoder {
        ChunkedEncoder {
            upstream,
            sent_last: false,
        }
    }

    /// The next framing piece, or `None` once the last-chunk is out.
    pub(crate) async fn next(&mut self) -> Option<io::Result<EncodedChunk>> {
        if self.sent_last {
            return None;
        }
        loop {
            return match self.upstream.next().await {
                Some(Ok(view)) if view.is_empty() => continue,
                Some(Ok(view)) => Some(Ok(EncodedChunk::data(view))),
                Some(Err(e)) => {
                    self.sent_last = true;
                    Some(Err(e))
                }
                None => {
                    self.sent_last = true;
                    Some(Ok(EncodedChunk::last()))
                }
            };
        }
    }
}

impl fmt::Debug for ChunkedEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedEncoder")
            .field("sent_last", &self.sent_last)
            .finish()
    }
}

/// One wire piece produced by the encoder.
#[derive(Debug)]
pub(crate) struct EncodedChunk {
    kind: BufKind,
}

#[derive(Debug)]
enum BufKind {
    Data(Chain<Chain<ChunkSize, Bytes>, StaticBuf>),
    Last(StaticBuf),
}

impl EncodedChunk {
    fn data(view: Bytes) -> EncodedChunk {
        let buf = ChunkSize::new(view.len())
            .chain(view)
            .chain(b"\r\n" as StaticBuf);
        EncodedChunk {
            kind: BufKind::Data(buf),
        }
    }

    fn last() -> EncodedChunk {
        EncodedChunk {
            kind: BufKind::Last(b"0\r\n"),
        }
    }
}

impl Buf for EncodedChunk {
    #[inline]
    fn remaining(&self) -> usize {
        match self.kind {
            BufKind::Data(ref b) => b.remaining(),
            BufKind::Last(ref b) => b.remaining(),
        }
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        match self.kind {
            BufKind::Data(ref b) => b.chunk(),
            BufKind::Last(ref b) => b.chunk(),
        }
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        match self.kind {
            BufKind::Data(ref mut b) => b.advance(cnt),
            BufKind::Last(ref mut b) => b.advance(cnt),
        }
    }
}

// each byte of a usize length becomes at most 2 hex digits, plus CRLF
const CHUNK_SIZE_MAX_BYTES: usize = std::mem::size_of::<usize>() * 2 + 2;

/// The ASCII hex size line of one chunk, on the stack.
#[derive(Clone, Copy)]
struct ChunkSize {
    bytes: [u8; CHUNK_SIZE_MAX_BYTES],
    pos: u8,
    len: u8,
}

impl ChunkSize {
    fn new(len: usize) -> ChunkSize {
        use std::fmt::Write;
        let mut size = ChunkSize {
            bytes: [0; CHUNK_SIZE_MAX_BYTES],
            pos: 0,
            len: 0,
        };
        write!(&mut size, "{:X}\r\n", len).expect("chunk size fits the stack buffer");
        size
    }
}

impl Buf for ChunkSize {
    #[inline]
    fn remaining(&self) -> usize {
        (self.len - self.pos).into()
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        &self.bytes[self.pos.into()..self.len.into()]
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.remaining());
        self.pos += cnt as u8;
    }
}

impl fmt::Debug for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSize")
            .field("bytes", &&self.bytes[..self.len.into()])
            .field("pos", &self.pos)
            .finish()
    }
}

impl fmt::Write for ChunkSize {
    fn write_str(&mut self, num: &str) -> fmt::Result {
        use std::io::Write;
        (&mut self.bytes[self.len.into()..])
            .write_all(num.as_bytes())
            .map_err(|_| fmt::Error)?;
        self.len += num.len() as u8;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ResponseBody;
    use bytes::BufMut;

    async fn encode_all(body: ResponseBody) -> Vec<u8> {
        let mut enc = ChunkedEncoder::new(body.open());
        let mut dst = Vec::new();
        while let Some(piece) = enc.next().await {
            dst.put(piece.unwrap());
        }
        dst
    }

    #[tokio::test]
    async fn frames_views_then_last_chunk() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"foo bar")),
            Ok(Bytes::from_static(b"baz quux herp")),
        ];
        let body = ResponseBody::streamed(futures_util::stream::iter(chunks));
        let dst = encode_all(body).await;
        assert_eq!(dst, b"7\r\nfoo bar\r\nD\r\nbaz quux herp\r\n0\r\n");
    }

    #[tokio::test]
    async fn empty_body_is_just_the_last_chunk() {
        let dst = encode_all(ResponseBody::empty()).await;
        assert_eq!(dst, b"0\r\n");
    }

    #[tokio::test]
    async fn empty_views_are_skipped() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"hi")),
            Ok(Bytes::new()),
        ];
        let body = ResponseBody::streamed(futures_util::stream::iter(chunks));
        let dst = encode_all(body).await;
        assert_eq!(dst, b"2\r\nhi\r\n0\r\n");
    }

    #[tokio::test]
    async fn round_trips_through_the_decoder() {
        use super::super::channel::ChannelState;
        use super::super::decode::ChunkedDecoder;
        use super::super::reader::ChannelReader;
        use super::super::timeout::IdleTimer;
        use std::sync::Arc;
        use std::time::Duration;

        for payload in [&b""[..], &b"x"[..], &b"abcdefgh"[..]] {
            let mut framed = encode_all(ResponseBody::full(Bytes::copy_from_slice(payload))).await;
            framed.extend_from_slice(b"\r\n"); // writer's closing CRLF
            let framed: &'static [u8] = framed.leak();

            let mut src = ChannelReader::new(
                Box::new(framed),
                Arc::new(IdleTimer::new(Duration::from_secs(5))),
                Arc::new(ChannelState::new()),
            );
            let mut dec = ChunkedDecoder::new();
            let mut out = Vec::new();
            while let Some(view) = dec.next(&mut src).await.unwrap() {
                out.extend_from_slice(&view);
            }
            assert_eq!(out, payload);
        }
    }
}
