//! Minimal media-type matching for handler selection.
//!
//! Only what routing needs: `type/subtype` with `*` wildcards, parameters
//! ignored apart from being stripped. Quality factors in `Accept` are
//! parsed only far enough to discard them.

use std::fmt;

/// A media type or media range, e.g. `text/plain` or `text/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    kind: String,
    subtype: String,
}

impl MediaType {
    /// `*/*`
    pub fn any() -> MediaType {
        MediaType {
            kind: "*".into(),
            subtype: "*".into(),
        }
    }

    /// Parse from a header-value shaped string. Parameters after `;`
    /// are dropped. Returns `None` when the shape is not `a/b`.
    pub fn parse(s: &str) -> Option<MediaType> {
        let essence = s.split(';').next().unwrap_or("").trim();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(MediaType {
            kind: kind.trim().to_ascii_lowercase(),
            subtype: subtype.trim().to_ascii_lowercase(),
        })
    }

    /// Whether `self`, read as a range, covers the concrete `other`.
    pub fn covers(&self, other: &MediaType) -> bool {
        (self.kind == "*" || self.kind == other.kind)
            && (self.subtype == "*" || self.subtype == other.subtype)
    }

    /// Whether either side, read as a range, covers the other. Used for
    /// matching a handler's produced type against an `Accept` range.
    pub fn compatible(&self, other: &MediaType) -> bool {
        self.covers(other) || other.covers(self)
    }

    /// Wildcard in either position.
    pub fn has_wildcard(&self) -> bool {
        self.kind == "*" || self.subtype == "*"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

/// Parse a comma separated `Accept` value into ranges, ignoring
/// parameters and quality factors. Unparseable members are skipped.
pub(crate) fn parse_accept(value: &str) -> Vec<MediaType> {
    value.split(',').filter_map(MediaType::parse).collect()
}
