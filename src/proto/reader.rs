//! Bounded, resumable byte source over the channel's read half.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::channel::ChannelState;
use super::timeout::IdleTimer;
use crate::error::{Direction, Error, Kind, User};

/// The amount reserved in the read buffer before each channel read.
pub(crate) const INIT_BUFFER_SIZE: usize = 8192;

type BoxRead = Box<dyn AsyncRead + Unpin + Send + Sync + 'static>;

/// A lazy sequence of read-only byte views off the channel.
///
/// The reader owns a single reusable buffer; views handed out are
/// frozen slices split off it. At most one reader exists per connection
/// at a time; between pipelined exchanges the dismissed reader is
/// consumed into a successor which inherits any buffered leftovers.
pub(crate) struct ChannelReader {
    io: BoxRead,
    buf: BytesMut,
    desire: Desire,
    eos: bool,
    started: Arc<AtomicBool>,
    timer: Arc<IdleTimer>,
    channel: Arc<ChannelState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desire {
    Unlimited,
    /// Remaining bytes the consumer may still pull.
    Limit(u64),
    Dismissed,
}

impl ChannelReader {
    pub(crate) fn new(
        io: BoxRead,
        timer: Arc<IdleTimer>,
        channel: Arc<ChannelState>,
    ) -> ChannelReader {
        ChannelReader {
            io,
            buf: BytesMut::with_capacity(0),
            desire: Desire::Unlimited,
            eos: false,
            started: Arc::new(AtomicBool::new(false)),
            timer,
            channel,
        }
    }

    /// Flag set (with release ordering) once the first byte of the
    /// current exchange has been received. Graceful shutdown reads it
    /// to tell idle connections from active ones.
    pub(crate) fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    pub(crate) fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Cap all future consumption at `n` bytes. Double-set is an error.
    pub(crate) fn limit(&mut self, n: u64) -> Result<(), Error> {
        match self.desire {
            Desire::Dismissed => Err(Error::new_user(User::SourceDismissed)),
            Desire::Limit(_) => Err(Error::new_user(User::LimitAlreadySet)),
            Desire::Unlimited => {
                self.desire = Desire::Limit(n);
                Ok(())
            }
        }
    }

    /// Return to unlimited mode. Only legal once a limit has been fully
    /// consumed.
    pub(crate) fn reset(&mut self) -> Result<(), Error> {
        match self.desire {
            Desire::Limit(0) => {
                self.desire = Desire::Unlimited;
                Ok(())
            }
            _ => Err(Error::new_user(User::ResetNotAllowed)),
        }
    }

    /// Remaining bytes under the current limit, if one is set.
    pub(crate) fn limit_remaining(&self) -> Option<u64> {
        match self.desire {
            Desire::Limit(n) => Some(n),
            _ => None,
        }
    }

    /// Stop producing. Idempotent; all later operations fail.
    pub(crate) fn dismiss(&mut self) {
        self.desire = Desire::Dismissed;
    }

    pub(crate) fn is_dismissed(&self) -> bool {
        self.desire == Desire::Dismissed
    }

    pub(crate) fn is_eos(&self) -> bool {
        self.eos
    }

    /// The next non-empty view, or `None` when the limit is reached or
    /// (in unlimited mode) the stream has ended.
    pub(crate) async fn next(&mut self) -> Result<Option<Bytes>, Error> {
        self.next_at_most(usize::MAX).await
    }

    /// Like [`next`](Self::next), but the returned view holds at most
    /// `cap` bytes; the rest stays buffered. The chunked decoder uses
    /// this to stop exactly at chunk boundaries.
    pub(crate) async fn next_at_most(&mut self, cap: usize) -> Result<Option<Bytes>, Error> {
        debug_assert!(cap > 0, "next_at_most requires a positive cap");
        loop {
            match self.desire {
                Desire::Dismissed => return Err(Error::new_user(User::SourceDismissed)),
                Desire::Limit(0) => return Ok(None),
                _ => {}
            }
            if !self.buf.is_empty() {
                let mut n = self.buf.len().min(cap);
                if let Desire::Limit(remaining) = self.desire {
                    n = (n as u64).min(remaining) as usize;
                    self.desire = Desire::Limit(remaining - n as u64);
                }
                return Ok(Some(self.buf.split_to(n).freeze()));
            }
            if self.eos {
                self.at_eos()?;
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    /// Consume a single byte. Same end conditions as [`next`](Self::next).
    pub(crate) async fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        loop {
            match self.desire {
                Desire::Dismissed => return Err(Error::new_user(User::SourceDismissed)),
                Desire::Limit(0) => return Ok(None),
                _ => {}
            }
            if !self.buf.is_empty() {
                if let Desire::Limit(remaining) = self.desire {
                    self.desire = Desire::Limit(remaining - 1);
                }
                let b = self.buf[0];
                self.buf.advance(1);
                return Ok(Some(b));
            }
            if self.eos {
                self.at_eos()?;
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    /// Look at the next byte without consuming it.
    pub(crate) async fn peek_byte(&mut self) -> Result<Option<u8>, Error> {
        loop {
            match self.desire {
                Desire::Dismissed => return Err(Error::new_user(User::SourceDismissed)),
                Desire::Limit(0) => return Ok(None),
                _ => {}
            }
            if !self.buf.is_empty() {
                return Ok(Some(self.buf[0]));
            }
            if self.eos {
                self.at_eos()?;
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    /// End-of-stream with a limit outstanding means the peer broke its
    /// own framing promise; the reader is done for.
    fn at_eos(&mut self) -> Result<(), Error> {
        if let Desire::Limit(_) = self.desire {
            self.dismiss();
            return Err(Error::new(Kind::UnexpectedEof));
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<(), Error> {
        self.buf.reserve(INIT_BUFFER_SIZE);
        let result = self
            .timer
            .guard(Direction::Read, self.io.read_buf(&mut self.buf))
            .await;
        let n = match result {
            Ok(Ok(n)) => n,
            Ok(Err(io_err)) => {
                self.dismiss();
                self.channel.shutdown_input();
                // a channel error caused by a fired timer reports as
                // the timeout, with the channel error attached
                return Err(if self.timer.has_fired() {
                    Error::new_idle(Direction::Read).with_suppressed(io_err)
                } else {
                    Error::new_io(io_err)
                });
            }
            Err(idle) => {
                self.dismiss();
                self.channel.shutdown_input();
                return Err(idle);
            }
        };
        if n == 0 {
            trace!("read eos");
            self.eos = true;
            self.channel.shutdown_input();
        } else {
            trace!("read {} bytes", n);
            self.started.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Produce the reader for the next pipelined exchange, transferring
    /// leftover buffered bytes. Requires `self` dismissed and not at
    /// end-of-stream.
    pub(crate) fn into_successor(mut self) -> Result<ChannelReader, Error> {
        if !self.is_dismissed() || self.eos {
            return Err(Error::new_user(User::SuccessorDenied));
        }
        self.started.store(false, Ordering::Release);
        Ok(ChannelReader {
            io: self.io,
            buf: mem::take(&mut self.buf),
            desire: Desire::Unlimited,
            eos: false,
            started: self.started,
            timer: self.timer,
            channel: self.channel,
        })
    }
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("buffered", &self.buf.len())
            .field("desire", &self.desire)
            .field("eos", &self.eos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reader_over(bytes: &'static [u8]) -> ChannelReader {
        ChannelReader::new(
            Box::new(bytes),
            Arc::new(IdleTimer::new(Duration::from_secs(5))),
            Arc::new(ChannelState::new()),
        )
    }

    #[tokio::test]
    async fn limit_caps_views_then_appears_empty() {
        let mut rdr = reader_over(b"hello world");
        rdr.limit(5).unwrap();
        assert!(!rdr.has_started());
        let mut got = Vec::new();
        while let Some(view) = rdr.next().await.unwrap() {
            got.extend_from_slice(&view);
        }
        assert_eq!(got, b"hello");
        assert!(rdr.has_started());
        assert_eq!(rdr.limit_remaining(), Some(0));
        // leftover stays buffered for the next consumer
        rdr.reset().unwrap();
        assert_eq!(&rdr.next().await.unwrap().unwrap()[..], b" world");
    }

    #[tokio::test]
    async fn double_limit_is_an_error() {
        let mut rdr = reader_over(b"x");
        rdr.limit(1).unwrap();
        assert!(rdr.limit(1).unwrap_err().is_user());
    }

    #[tokio::test]
    async fn eos_with_limit_outstanding_fails() {
        let mut rdr = reader_over(b"abc");
        rdr.limit(10).unwrap();
        assert_eq!(&rdr.next().await.unwrap().unwrap()[..], b"abc");
        let err = rdr.next().await.unwrap_err();
        assert!(err.is_unexpected_eof());
        assert!(rdr.is_dismissed());
    }

    #[tokio::test]
    async fn eos_unlimited_is_a_clean_end() {
        let mut rdr = reader_over(b"abc");
        assert_eq!(&rdr.next().await.unwrap().unwrap()[..], b"abc");
        assert!(rdr.next().await.unwrap().is_none());
        assert!(rdr.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dismissed_reader_refuses() {
        let mut rdr = reader_over(b"abc");
        rdr.dismiss();
        rdr.dismiss(); // idempotent
        assert!(rdr.next().await.unwrap_err().is_user());
    }

    #[tokio::test]
    async fn successor_inherits_leftovers() {
        let mut rdr = reader_over(b"onetwo");
        rdr.limit(3).unwrap();
        assert_eq!(&rdr.next().await.unwrap().unwrap()[..], b"one");
        rdr.dismiss();
        let mut next = rdr.into_successor().unwrap();
        assert_eq!(&next.next().await.unwrap().unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn successor_requires_dismissal() {
        let rdr = reader_over(b"abc");
        assert!(rdr.into_successor().unwrap_err().is_user());
    }

    #[tokio::test]
    async fn read_byte_and_peek() {
        let mut rdr = reader_over(b"ab");
        assert_eq!(rdr.peek_byte().await.unwrap(), Some(b'a'));
        assert_eq!(rdr.read_byte().await.unwrap(), Some(b'a'));
        assert_eq!(rdr.read_byte().await.unwrap(), Some(b'b'));
        assert_eq!(rdr.read_byte().await.unwrap(), None);
    }
}
