//! Request-line, header and trailer parsers.
//!
//! All three share the [`TokenParser`] base and the uniform line rule:
//! LF terminates, CR is legal only immediately before LF. The head
//! parsers consume bytes one at a time off the [`ChannelReader`] and
//! charge every byte against the configured head (or trailer) size limit.

use tracing::trace;

use super::reader::ChannelReader;
use super::tokens::TokenParser;
use crate::error::{Error, Kind, Parse};
use crate::headers::{latin1, Headers};
use crate::version::HttpVersion;

/// Parsed request line.
#[derive(Debug)]
pub(crate) struct RequestLine {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) version: HttpVersion,
}

/// Parser for a request head: request line, then headers. Also used for
/// trailer blocks, which share the header grammar with their own size limit.
pub(crate) struct HeadParser<'r> {
    src: &'r mut ChannelReader,
    tok: TokenParser,
    read: usize,
    max: usize,
    what: Parse,
}

impl<'r> HeadParser<'r> {
    pub(crate) fn new(src: &'r mut ChannelReader, max: usize) -> HeadParser<'r> {
        HeadParser {
            src,
            tok: TokenParser::new(),
            read: 0,
            max,
            what: Parse::Header,
        }
    }

    pub(crate) fn for_trailers(src: &'r mut ChannelReader, max: usize) -> HeadParser<'r> {
        HeadParser {
            src,
            tok: TokenParser::new(),
            read: 0,
            max,
            what: Parse::Trailer,
        }
    }

    /// Pull one byte; `false` at end-of-stream. Enforces the size
    /// limit and the CR rule.
    async fn advance(&mut self, what: Parse) -> Result<bool, Error> {
        match self.src.read_byte().await? {
            Some(b) => {
                self.read += 1;
                if self.read > self.max {
                    return Err(Error::new_parse(Parse::TooLarge));
                }
                self.tok.observe(b);
                if self.tok.violates_cr_rule() {
                    return Err(Error::new_parse(what).with("CR not followed by LF"));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Current byte is CR; the next byte must be LF.
    async fn lf_after_cr(&mut self, what: Parse) -> Result<(), Error> {
        if !self.advance(what).await? {
            return Err(incomplete(what));
        }
        debug_assert!(self.tok.is_lf());
        Ok(())
    }

    /// SP or HT; the token separators of the request line.
    fn is_sep(&self) -> bool {
        matches!(self.tok.current(), b' ' | b'\t')
    }

    /// Parse the request line. An end-of-stream before the first byte
    /// is a client abort, not a parse error.
    pub(crate) async fn request_line(&mut self) -> Result<RequestLine, Error> {
        // Skip whitespace (including stray CRLFs) before the method.
        loop {
            if !self.advance(Parse::RequestLine).await? {
                return Err(if self.read == 0 {
                    Error::new(Kind::ClientAborted)
                } else {
                    incomplete(Parse::RequestLine)
                });
            }
            if !self.tok.is_whitespace() {
                break;
            }
        }

        // Method, up to the first separator; a line end here means the
        // target never arrived.
        self.tok.accept();
        loop {
            if !self.advance(Parse::Method).await? {
                return Err(incomplete(Parse::Method));
            }
            if self.tok.is_lf() {
                return Err(Error::new_parse(Parse::Target).with("missing request target"));
            }
            if self.tok.is_cr() {
                self.lf_after_cr(Parse::Method).await?;
                return Err(Error::new_parse(Parse::Target).with("missing request target"));
            }
            if self.is_sep() {
                break;
            }
            self.tok.accept();
        }
        let method = latin1(
            &self
                .tok
                .finish_non_empty()
                .ok_or_else(|| Error::new_parse(Parse::Method))?,
        );

        // Separators, then the target.
        loop {
            if !self.advance(Parse::Target).await? {
                return Err(incomplete(Parse::Target));
            }
            if self.tok.is_lf() {
                return Err(Error::new_parse(Parse::Target).with("missing request target"));
            }
            if self.tok.is_cr() {
                self.lf_after_cr(Parse::Target).await?;
                return Err(Error::new_parse(Parse::Target).with("missing request target"));
            }
            if !self.is_sep() {
                break;
            }
        }
        self.tok.accept();
        loop {
            if !self.advance(Parse::Target).await? {
                return Err(incomplete(Parse::Target));
            }
            if self.tok.is_lf() {
                return Err(Error::new_parse(Parse::Version).with("missing HTTP version"));
            }
            if self.tok.is_cr() {
                self.lf_after_cr(Parse::Target).await?;
                return Err(Error::new_parse(Parse::Version).with("missing HTTP version"));
            }
            if self.is_sep() {
                break;
            }
            self.tok.accept();
        }
        let target = latin1(&self.tok.finish());

        // Separators, then the version, up to the line end.
        loop {
            if !self.advance(Parse::Version).await? {
                return Err(incomplete(Parse::Version));
            }
            if !self.is_sep() {
                break;
            }
        }
        let version = loop {
            if self.tok.is_cr() {
                self.lf_after_cr(Parse::Version).await?;
            }
            if let Some(token) = self.tok.try_finish_non_empty_on_lf() {
                let token = token.ok_or_else(|| {
                    Error::new_parse(Parse::Version).with("missing HTTP version")
                })?;
                break parse_version(&token)?;
            }
            if self.is_sep() {
                return Err(Error::new_parse(Parse::Version).with("whitespace in HTTP version"));
            }
            self.tok.accept();
            if !self.advance(Parse::Version).await? {
                return Err(incomplete(Parse::Version));
            }
        };

        trace!("request line parsed; method={} target={}", method, target);
        Ok(RequestLine {
            method,
            target,
            version,
        })
    }

    /// Parse header (or trailer) lines up to and including the empty
    /// line. Handles obs-fold continuations.
    pub(crate) async fn headers(&mut self) -> Result<Headers, Error> {
        let what = self.what;
        let mut headers = Headers::with_capacity(8);
        // Finished lines wait here until the next line proves it is not
        // a folded continuation; trailing whitespace is stripped only
        // when the field is committed.
        let mut pending: Option<(String, String)> = None;

        loop {
            if !self.advance(what).await? {
                return Err(incomplete(what));
            }
            if self.tok.is_cr() {
                self.lf_after_cr(what).await?;
                break;
            }
            if self.tok.is_lf() {
                break;
            }

            if self.is_sep() {
                // Obs-fold: this line continues the previous value.
                let (name, value) = pending
                    .take()
                    .ok_or_else(|| Error::new_parse(what).with("whitespace before first header"))?;
                let mut line_ended = false;
                loop {
                    if !self.advance(what).await? {
                        return Err(incomplete(what));
                    }
                    if self.tok.is_lf() {
                        line_ended = true;
                        break;
                    }
                    if self.tok.is_cr() {
                        self.lf_after_cr(what).await?;
                        line_ended = true;
                        break;
                    }
                    if !self.is_sep() {
                        break;
                    }
                }
                if line_ended {
                    // A continuation of nothing but whitespace leaves
                    // the value exactly as it was.
                    pending = Some((name, value));
                    continue;
                }
                self.tok.accept();
                let continuation = loop {
                    if !self.advance(what).await? {
                        return Err(incomplete(what));
                    }
                    if self.tok.is_cr() {
                        self.lf_after_cr(what).await?;
                    }
                    if let Some(token) = self.tok.try_finish_on_lf() {
                        break latin1(&token);
                    }
                    self.tok.accept();
                };
                let base = value.trim_end();
                let joined = if base.is_empty() {
                    continuation
                } else {
                    format!("{} {}", base, continuation)
                };
                pending = Some((name, joined));
                continue;
            }

            // A fresh header line; the previous one is final.
            if let Some((name, value)) = pending.take() {
                headers.append(name, value.trim_end().to_owned());
            }

            if self.tok.is_colon() {
                return Err(Error::new_parse(what).with("empty header name"));
            }
            self.tok.accept();
            loop {
                if !self.advance(what).await? {
                    return Err(incomplete(what));
                }
                if self.tok.is_colon() {
                    break;
                }
                if self.tok.is_whitespace() {
                    return Err(Error::new_parse(what).with("whitespace in header name"));
                }
                self.tok.accept();
            }
            let name = latin1(&self.tok.finish());

            // Value: at most one leading SP/HT is stripped.
            if !self.advance(what).await? {
                return Err(incomplete(what));
            }
            if self.tok.is_lf() {
                pending = Some((name, String::new()));
                continue;
            }
            if self.tok.is_cr() {
                self.lf_after_cr(what).await?;
                pending = Some((name, String::new()));
                continue;
            }
            if !self.is_sep() {
                self.tok.accept();
            }
            let value = loop {
                if !self.advance(what).await? {
                    return Err(incomplete(what));
                }
                if self.tok.is_cr() {
                    self.lf_after_cr(what).await?;
                }
                if let Some(token) = self.tok.try_finish_on_lf() {
                    break latin1(&token);
                }
                self.tok.accept();
            };
            pending = Some((name, value));
        }

        if let Some((name, value)) = pending.take() {
            headers.append(name, value.trim_end().to_owned());
        }
        trace!("parsed {} header fields", headers.len());
        Ok(headers)
    }
}

/// Parse a trailer block, consuming its terminating empty line.
pub(crate) async fn parse_trailers(
    src: &mut ChannelReader,
    max: usize,
) -> Result<Headers, Error> {
    HeadParser::for_trailers(src, max).headers().await
}

fn parse_version(token: &[u8]) -> Result<HttpVersion, Error> {
    let err = || Error::new_parse(Parse::Version);
    let s = std::str::from_utf8(token).map_err(|_| err())?;
    let rest = s.strip_prefix("HTTP/").ok_or_else(err)?;
    let (major, minor) = rest.split_once('.').ok_or_else(err)?;
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !digits(major) || !digits(minor) {
        return Err(err());
    }
    Ok(HttpVersion {
        major: major.parse().map_err(|_| err())?,
        minor: minor.parse().map_err(|_| err())?,
    })
}

fn incomplete(what: Parse) -> Error {
    Error::new_parse(what).with("unexpected end of stream")
}

#[cfg(test)]
mod tests {
    use super::super::channel::ChannelState;
    use super::super::timeout::IdleTimer;
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn reader_over(bytes: &'static [u8]) -> ChannelReader {
        ChannelReader::new(
            Box::new(bytes),
            Arc::new(IdleTimer::new(Duration::from_secs(5))),
            Arc::new(ChannelState::new()),
        )
    }

    async fn parse_line(input: &'static [u8]) -> Result<RequestLine, Error> {
        let mut src = reader_over(input);
        HeadParser::new(&mut src, 8_000).request_line().await
    }

    async fn parse_head(input: &'static [u8]) -> Result<Headers, Error> {
        let mut src = reader_over(input);
        HeadParser::new(&mut src, 8_000).headers().await
    }

    #[tokio::test]
    async fn request_line_crlf_and_lf_only() {
        for input in [&b"GET /hello HTTP/1.1\r\n"[..], &b"GET /hello HTTP/1.1\n"[..]] {
            let line = parse_line(input).await.unwrap();
            assert_eq!(line.method, "GET");
            assert_eq!(line.target, "/hello");
            assert_eq!(line.version, HttpVersion::HTTP_11);
        }
    }

    #[tokio::test]
    async fn request_line_extra_separators_and_leading_blank_lines() {
        let line = parse_line(b"\r\n\r\n  POST   /a/b   HTTP/1.0\r\n").await.unwrap();
        assert_eq!(line.method, "POST");
        assert_eq!(line.target, "/a/b");
        assert_eq!(line.version, HttpVersion::HTTP_10);
    }

    #[tokio::test]
    async fn bare_cr_is_rejected() {
        assert!(parse_line(b"GET /hello\rHTTP/1.1\r\n").await.unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn missing_target_or_version() {
        assert!(parse_line(b"GET\r\n").await.unwrap_err().is_parse());
        assert!(parse_line(b"GET /hello\r\n").await.unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn version_must_be_integers() {
        assert!(parse_line(b"GET / HTTP/one.two\r\n").await.unwrap_err().is_parse());
        assert!(parse_line(b"GET / HTTP/1 .1\r\n").await.unwrap_err().is_parse());
        let line = parse_line(b"GET / HTTP/12.34\r\n").await.unwrap();
        assert_eq!(line.version, HttpVersion { major: 12, minor: 34 });
    }

    #[tokio::test]
    async fn eos_before_any_byte_is_client_abort() {
        let err = parse_line(b"").await.unwrap_err();
        assert!(err.is_client_aborted());
    }

    #[tokio::test]
    async fn eos_mid_line_is_a_parse_error() {
        let err = parse_line(b"XXX /incomplete").await.unwrap_err();
        assert!(err.is_parse());
        assert!(!err.is_client_aborted());
    }

    #[tokio::test]
    async fn headers_basic() {
        let h = parse_head(b"Host: example.com\r\nX-Two:2\r\n\r\n").await.unwrap();
        assert_eq!(h.get("host"), Some("example.com"));
        assert_eq!(h.get("x-two"), Some("2"));
        assert_eq!(h.len(), 2);
    }

    #[tokio::test]
    async fn header_value_strips_one_leading_space_and_trailing_ws() {
        let h = parse_head(b"A:  two-spaces\r\nB: padded \t\r\n\r\n").await.unwrap();
        assert_eq!(h.get("A"), Some(" two-spaces"));
        assert_eq!(h.get("B"), Some("padded"));
    }

    #[tokio::test]
    async fn header_name_casing_is_preserved() {
        let h = parse_head(b"X-MiXeD: v\r\n\r\n").await.unwrap();
        assert_eq!(h.iter().next().unwrap().0, "X-MiXeD");
    }

    #[tokio::test]
    async fn obs_fold_joins_with_single_space() {
        let h = parse_head(b"Subject: line one   \r\n    line two\r\n\r\n").await.unwrap();
        assert_eq!(h.get("subject"), Some("line one line two"));
    }

    #[tokio::test]
    async fn obs_fold_of_whitespace_only_is_idempotent() {
        let h = parse_head(b"Subject: original\r\n   \t \r\n\r\n").await.unwrap();
        assert_eq!(h.get("subject"), Some("original"));
    }

    #[tokio::test]
    async fn whitespace_before_first_header_is_rejected() {
        assert!(parse_head(b" Oops: v\r\n\r\n").await.unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn whitespace_in_header_name_is_rejected() {
        assert!(parse_head(b"Bad Name: v\r\n\r\n").await.unwrap_err().is_parse());
        assert!(parse_head(b"BadName : v\r\n\r\n").await.unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn empty_header_name_is_rejected() {
        assert!(parse_head(b": v\r\n\r\n").await.unwrap_err().is_parse());
    }

    #[tokio::test]
    async fn empty_value_is_kept() {
        let h = parse_head(b"X-Empty:\r\n\r\n").await.unwrap();
        assert_eq!(h.get("x-empty"), Some(""));
    }

    #[tokio::test]
    async fn head_size_boundary() {
        // "A: b\r\n\r\n" is exactly 8 bytes
        let input: &[u8] = b"A: b\r\n\r\n";
        let mut src = reader_over(input);
        assert!(HeadParser::new(&mut src, 8).headers().await.is_ok());

        let mut src = reader_over(input);
        let err = HeadParser::new(&mut src, 7).headers().await.unwrap_err();
        assert!(err.is_too_large());
    }

    #[tokio::test]
    async fn trailers_share_the_grammar() {
        let mut src = reader_over(b"X-Sum: 9\r\n\r\nrest");
        let t = parse_trailers(&mut src, 8_000).await.unwrap();
        assert_eq!(t.get("x-sum"), Some("9"));
        // the terminating empty line is consumed, the rest is not
        assert_eq!(&src.next().await.unwrap().unwrap()[..], b"rest");
    }

    #[tokio::test]
    async fn empty_trailer_block_swallows_only_the_crlf() {
        let mut src = reader_over(b"\r\nGET / HTTP/1.1\r\n");
        let t = parse_trailers(&mut src, 8_000).await.unwrap();
        assert!(t.is_empty());
        assert_eq!(&src.next().await.unwrap().unwrap()[..], b"GET / HTTP/1.1\r\n");
    }
}
