//! Error types for link resolution.
//!
//! Only transient failures are errors. A provider saying "this file does not
//! exist" is a normal answer and comes back as a [`FileInfo`](super::FileInfo)
//! with `resolution_failed` set, never as a [`ResolveError`].

use thiserror::Error;

use crate::fetch::FetchError;

/// Transient failures while resolving a link. The Job retries these.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The metadata or page request failed (network, timeout, 5xx, ...).
    #[error("request failed while resolving '{link}': {source}")]
    Fetch {
        /// The link being resolved.
        link: String,
        /// Underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// The provider answered with a body that could not be decoded.
    #[error("undecodable response from {url} while resolving '{link}': {reason}")]
    Decode {
        /// The link being resolved.
        link: String,
        /// The endpoint that returned the body.
        url: String,
        /// Why decoding failed.
        reason: String,
    },
}

impl ResolveError {
    /// Creates a `Fetch` error.
    #[must_use]
    pub fn fetch(link: &str, source: FetchError) -> Self {
        Self::Fetch {
            link: link.to_string(),
            source,
        }
    }

    /// Creates a `Decode` error.
    #[must_use]
    pub fn decode(link: &str, url: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            link: link.to_string(),
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
