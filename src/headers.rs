//! An ordered, case-preserving header multimap.
//!
//! Backed by a plain vector of name/value pairs: insertion order is the
//! iteration order, names compare case-insensitively but are echoed with
//! the casing they arrived with. Values are decoded latin-1, so every
//! byte that came off the wire round-trips back onto it.

use std::fmt;
use std::slice;

use crate::error::{Error, Parse};

/// Decode bytes as latin-1; lossless for any byte value.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Re-encode a latin-1 decoded string onto the wire.
///
/// Characters above U+00FF cannot have come from [`latin1`] and are
/// written as `?`.
pub(crate) fn write_latin1(s: &str, dst: &mut Vec<u8>) {
    dst.extend(s.chars().map(|c| if c as u32 <= 0xFF { c as u8 } else { b'?' }));
}

/// An ordered multimap of header (or trailer) fields.
#[derive(Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty map.
    pub fn new() -> Headers {
        Headers::default()
    }

    pub(crate) fn with_capacity(n: usize) -> Headers {
        Headers {
            entries: Vec::with_capacity(n),
        }
    }

    /// Number of fields, repeats included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a field, keeping any existing fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Set a field, removing all existing fields of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove every field with this name; true if any was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// The first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any field with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All fields in insertion order, names as received.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Whether any value of `name`, read as a comma separated token
    /// list, contains `token` (case-insensitively).
    ///
    /// This is how `Connection: close` and `Transfer-Encoding: chunked`
    /// are recognized.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).any(|value| {
            value
                .split(',')
                .any(|member| member.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Parse `Content-Length`.
    ///
    /// `Ok(None)` when absent. Multiple fields must agree; a value that
    /// is not a plain non-negative integer is a parse error.
    pub fn content_length(&self) -> Result<Option<u64>, Error> {
        let mut parsed: Option<u64> = None;
        for value in self.get_all("Content-Length") {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::new_parse(Parse::ContentLength));
            }
            let n: u64 = value
                .parse()
                .map_err(|_| Error::new_parse(Parse::ContentLength))?;
            match parsed {
                Some(prev) if prev != n => {
                    return Err(Error::new_parse(Parse::ContentLength));
                }
                _ => parsed = Some(n),
            }
        }
        Ok(parsed)
    }

    /// Whether the final `Transfer-Encoding` coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        let mut last_is_chunked = false;
        for value in self.get_all("Transfer-Encoding") {
            for coding in value.split(',') {
                let coding = coding.trim();
                if !coding.is_empty() {
                    last_is_chunked = coding.eq_ignore_ascii_case("chunked");
                }
            }
        }
        last_is_chunked
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (String, String);
    type IntoIter = slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(n, v)| (n, v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup_preserves_casing() {
        let mut h = Headers::new();
        h.append("X-CuStOm", "1");
        assert_eq!(h.get("x-custom"), Some("1"));
        let echoed: Vec<_> = h.iter().collect();
        assert_eq!(echoed, vec![("X-CuStOm", "1")]);
    }

    #[test]
    fn append_keeps_order_set_replaces() {
        let mut h = Headers::new();
        h.append("Via", "a");
        h.append("Via", "b");
        assert_eq!(h.get_all("via").collect::<Vec<_>>(), vec!["a", "b"]);
        h.set("VIA", "c");
        assert_eq!(h.get_all("via").collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn token_lists() {
        let mut h = Headers::new();
        h.append("Connection", "keep-alive, Close");
        assert!(h.has_token("connection", "close"));
        assert!(!h.has_token("connection", "upgrade"));
    }

    #[test]
    fn content_length_parsing() {
        let mut h = Headers::new();
        assert_eq!(h.content_length().unwrap(), None);
        h.append("Content-Length", "42");
        assert_eq!(h.content_length().unwrap(), Some(42));
        h.append("content-length", "42");
        assert_eq!(h.content_length().unwrap(), Some(42));
        h.append("Content-Length", "7");
        assert!(h.content_length().is_err());

        let mut bad = Headers::new();
        bad.append("Content-Length", "-1");
        assert!(bad.content_length().is_err());
        let mut bad = Headers::new();
        bad.append("Content-Length", "4 2");
        assert!(bad.content_length().is_err());
    }

    #[test]
    fn chunked_is_final_coding() {
        let mut h = Headers::new();
        h.append("Transfer-Encoding", "gzip, chunked");
        assert!(h.is_chunked());
        let mut h = Headers::new();
        h.append("Transfer-Encoding", "chunked, gzip");
        assert!(!h.is_chunked());
    }

    #[test]
    fn latin1_round_trip() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let s = latin1(&bytes);
        let mut out = Vec::new();
        write_latin1(&s, &mut out);
        assert_eq!(out, bytes);
    }
}
