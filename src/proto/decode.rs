//! Chunked transfer decoding.

use bytes::Bytes;
use tracing::trace;

use super::reader::ChannelReader;
use crate::error::Error;

/// Upper bound on the size of one decoded view handed to the consumer.
pub(crate) const MAX_DECODED_VIEW: usize = 512;

/// Chunk sizes are capped at 16 hex digits; anything longer overflows.
const MAX_SIZE_DIGITS: u8 = 16;

/// Single-use decoder for one chunked request body.
///
/// Reads the chunk framing off the [`ChannelReader`] byte by byte and
/// hands back decoded data views of at most [`MAX_DECODED_VIEW`] bytes.
/// Once the last-chunk's size line is consumed the decoder is done and
/// deliberately leaves the terminating CRLF (and any trailer block) in
/// the reader for the trailer parser to swallow.
#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: ChunkState,
    size: u64,
    digits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Ext,
    Data,
    Done,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> ChunkedDecoder {
        ChunkedDecoder {
            state: ChunkState::Size,
            size: 0,
            digits: 0,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// The next decoded view, or `None` after the last-chunk.
    pub(crate) async fn next(
        &mut self,
        src: &mut ChannelReader,
    ) -> Result<Option<Bytes>, Error> {
        loop {
            match self.state {
                ChunkState::Done => return Ok(None),
                ChunkState::Size => self.step_size(src).await?,
                ChunkState::Ext => self.step_ext(src).await?,
                ChunkState::Data => {
                    if self.size == 0 {
                        self.read_data_end(src).await?;
                        self.state = ChunkState::Size;
                        continue;
                    }
                    let cap = self.size.min(MAX_DECODED_VIEW as u64) as usize;
                    let view = src
                        .next_at_most(cap)
                        .await?
                        .ok_or_else(|| Error::new_decode("unexpected end of chunked body"))?;
                    self.size -= view.len() as u64;
                    return Ok(Some(view));
                }
            }
        }
    }

    async fn step_size(&mut self, src: &mut ChannelReader) -> Result<(), Error> {
        match self.byte(src).await? {
            b @ (b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F') => {
                if self.digits == MAX_SIZE_DIGITS {
                    return Err(Error::new_decode("chunk size overflow"));
                }
                self.digits += 1;
                self.size = (self.size << 4) | u64::from(hex_value(b));
            }
            b';' => {
                if self.digits == 0 {
                    return Err(Error::new_decode("empty chunk size"));
                }
                self.state = ChunkState::Ext;
            }
            // Naive producers concatenate "size CR" "LF"; a stray CR in
            // the size line is skipped rather than rejected.
            b'\r' => {}
            b'\n' => {
                if self.digits == 0 {
                    return Err(Error::new_decode("empty chunk size"));
                }
                self.end_of_size_line();
            }
            _ => return Err(Error::new_decode("invalid chunk size")),
        }
        Ok(())
    }

    async fn step_ext(&mut self, src: &mut ChannelReader) -> Result<(), Error> {
        match self.byte(src).await? {
            b'"' => Err(Error::new_decode("quote in chunk extension")),
            b'\n' => {
                self.end_of_size_line();
                Ok(())
            }
            // extensions are discarded wholesale
            _ => Ok(()),
        }
    }

    fn end_of_size_line(&mut self) {
        self.digits = 0;
        if self.size > 0 {
            trace!("chunk size {}", self.size);
            self.state = ChunkState::Data;
        } else {
            trace!("last-chunk; leaving terminal CRLF for the trailer parser");
            self.state = ChunkState::Done;
        }
    }

    /// After the declared data bytes: CRLF or a bare LF, nothing else.
    async fn read_data_end(&mut self, src: &mut ChannelReader) -> Result<(), Error> {
        match self.byte(src).await? {
            b'\r' => match self.byte(src).await? {
                b'\n' => Ok(()),
                _ => Err(Error::new_decode("missing LF at chunk boundary")),
            },
            b'\n' => Ok(()),
            _ => Err(Error::new_decode("extra bytes after chunk data")),
        }
    }

    async fn byte(&mut self, src: &mut ChannelReader) -> Result<u8, Error> {
        src.read_byte()
            .await?
            .ok_or_else(|| Error::new_decode("unexpected end of chunked body"))
    }
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}
