//! The request target: raw bytes, segments and query.

use std::fmt;

use crate::error::{Error, Parse};

/// A parsed request target.
///
/// The raw form is preserved byte for byte (percent-encodings intact);
/// the decoded view applies RFC 3986 percent-decoding with `+` left
/// as-is. Dot segments are resolved while splitting: `.` and empty
/// segments disappear, and `..` removes the preceding segment when one
/// exists, otherwise it stays literal.
pub struct Target {
    raw: String,
    raw_segments: Vec<String>,
    decoded_segments: Vec<String>,
    query: Option<String>,
}

impl Target {
    pub(crate) fn parse(raw: &str) -> Result<Target, Error> {
        let (path, query) = match raw.split_once('?') {
            Some((p, q)) => (p, Some(q.to_owned())),
            None => (raw, None),
        };

        let mut raw_segments = Vec::new();
        let mut decoded_segments = Vec::new();
        for seg in path.split('/') {
            let decoded = percent_decode(seg)?;
            if decoded.is_empty() || decoded == "." {
                continue;
            }
            if decoded == ".." {
                if raw_segments.is_empty() {
                    raw_segments.push(seg.to_owned());
                    decoded_segments.push(decoded);
                } else {
                    raw_segments.pop();
                    decoded_segments.pop();
                }
                continue;
            }
            raw_segments.push(seg.to_owned());
            decoded_segments.push(decoded);
        }

        Ok(Target {
            raw: raw.to_owned(),
            raw_segments,
            decoded_segments,
            query,
        })
    }

    /// The request target exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Path segments with percent-encodings intact.
    pub fn raw_segments(&self) -> &[String] {
        &self.raw_segments
    }

    /// Path segments after percent-decoding.
    pub fn decoded_segments(&self) -> &[String] {
        &self.decoded_segments
    }

    /// Everything after the first `?`, undecoded; `None` when absent.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("raw", &self.raw)
            .field("segments", &self.decoded_segments)
            .field("query", &self.query)
            .finish()
    }
}

/// RFC 3986 percent-decoding. `+` is not a space at this layer. Decoded
/// bytes are read as UTF-8, falling back to replacement characters.
pub(crate) fn percent_decode(s: &str) -> Result<String, Error> {
    if !s.contains('%') {
        return Ok(s.to_owned());
    }
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next().and_then(hex_digit);
            let lo = bytes.next().and_then(hex_digit);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                _ => {
                    return Err(Error::new_parse(Parse::Target).with("invalid percent-encoding"))
                }
            }
        } else {
            out.push(b);
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path() {
        let t = Target::parse("/a/b/c").unwrap();
        assert_eq!(t.decoded_segments(), &["a", "b", "c"]);
        assert_eq!(t.raw_segments(), &["a", "b", "c"]);
        assert!(t.query().is_none());
    }

    #[test]
    fn raw_preserved_decoded_decoded() {
        let t = Target::parse("/greet/Jo%68n?x=%20").unwrap();
        assert_eq!(t.raw(), "/greet/Jo%68n?x=%20");
        assert_eq!(t.raw_segments(), &["greet", "Jo%68n"]);
        assert_eq!(t.decoded_segments(), &["greet", "John"]);
        assert_eq!(t.query(), Some("x=%20"));
    }

    #[test]
    fn plus_is_not_space() {
        let t = Target::parse("/a+b").unwrap();
        assert_eq!(t.decoded_segments(), &["a+b"]);
    }

    #[test]
    fn dot_and_empty_segments_collapse() {
        let t = Target::parse("//a/./b//").unwrap();
        assert_eq!(t.decoded_segments(), &["a", "b"]);
    }

    #[test]
    fn dot_dot_removes_one_level() {
        let t = Target::parse("/a/b/../c").unwrap();
        assert_eq!(t.decoded_segments(), &["a", "c"]);
        // without a preceding segment it stays literal
        let t = Target::parse("/../a").unwrap();
        assert_eq!(t.decoded_segments(), &["..", "a"]);
    }

    #[test]
    fn encoded_dot_collapses_too() {
        let t = Target::parse("/a/%2E/b").unwrap();
        assert_eq!(t.decoded_segments(), &["a", "b"]);
    }

    #[test]
    fn bad_encoding_is_rejected() {
        assert!(Target::parse("/a%GG").is_err());
        assert!(Target::parse("/a%2").is_err());
    }

    #[test]
    fn root_target() {
        let t = Target::parse("/").unwrap();
        assert!(t.decoded_segments().is_empty());
    }
}
