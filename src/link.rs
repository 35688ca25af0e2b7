//! Link normalization and work-list text parsing.
//!
//! A [`Link`] is the canonical form of one line of the work list: lowercased,
//! trimmed of surrounding whitespace and of trailing slashes, and validated as
//! an absolute URI. Two lines that normalize to the same text are the same link.
//!
//! # Example
//!
//! ```
//! use linkfetch_core::link::parse_link_list;
//!
//! let parsed = parse_link_list("https://Example.com/File/AbC/\nnot a url\n");
//! assert_eq!(parsed.links.len(), 1);
//! assert_eq!(parsed.discarded, 1);
//! assert!(parsed.links.iter().any(|l| l.as_str() == "https://example.com/file/abc"));
//! ```

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, trace};
use url::Url;

/// A normalized source link naming one file to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link(String);

impl Link {
    /// Normalizes and validates a raw line.
    ///
    /// Returns `None` for empty lines and for anything that is not an
    /// absolute URI with a host.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.to_lowercase();
        let normalized = normalized.trim().trim_end_matches('/');
        if normalized.is_empty() {
            return None;
        }

        let url = Url::parse(normalized).ok()?;
        if url.host_str().is_none_or(str::is_empty) {
            trace!(line = %normalized, "discarding link without host");
            return None;
        }

        Some(Self(normalized.to_string()))
    }

    /// Returns the canonical text of the link.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the parsed URL. Always succeeds for a constructed link.
    #[must_use]
    pub fn url(&self) -> Option<Url> {
        Url::parse(&self.0).ok()
    }

    /// Returns the provider identifier: the last non-empty path segment.
    #[must_use]
    pub fn provider_id(&self) -> Option<String> {
        let url = self.url()?;
        url.path_segments()?
            .rev()
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Link {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of parsing the raw work-list text.
#[derive(Debug, Default, Clone)]
pub struct ParsedLinks {
    /// Unique, normalized links.
    pub links: HashSet<Link>,
    /// Number of non-empty lines that did not parse as an absolute URI.
    pub discarded: usize,
    /// Number of lines that collapsed onto an already-seen link.
    pub duplicates: usize,
}

/// Parses newline-separated work-list text into a set of links.
///
/// Invalid lines are silently discarded (counted, never an error).
#[must_use]
#[tracing::instrument(skip(text), fields(text_len = text.len()))]
pub fn parse_link_list(text: &str) -> ParsedLinks {
    let mut parsed = ParsedLinks::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match Link::parse(line) {
            Some(link) => {
                if !parsed.links.insert(link) {
                    parsed.duplicates += 1;
                }
            }
            None => {
                debug!(line = %line.trim(), "discarding line that is not an absolute URI");
                parsed.discarded += 1;
            }
        }
    }

    parsed
}
