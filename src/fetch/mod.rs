//! HTTP fetching: metadata bodies and streamed payloads.
//!
//! # Features
//!
//! - One shared client per run (connection pooling is reqwest's concern)
//! - Payloads stream to `<name>.part` and are renamed only after a complete,
//!   correctly classified transfer, so a file at the final name is always whole
//! - Content-type classification rejects HTML error pages served with 200 OK
//! - The [`Fetcher`] trait lets Jobs run against instrumented fakes in tests

mod client;
mod error;
mod filename;

pub use client::HttpClient;
pub use error::FetchError;
pub use filename::{PARTIAL_SUFFIX, filename_from_url, partial_path, safe_file_name};

use std::path::Path;

use async_trait::async_trait;

pub(crate) mod constants {
    /// Default HTTP connect timeout (30 seconds).
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;

    /// Default idle time allowed between body reads (5 minutes).
    pub const READ_TIMEOUT_SECS: u64 = 300;
}

pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Provider-specific rule deciding whether a 200 response carries the payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentClass {
    /// Any content-type is accepted.
    #[default]
    Any,
    /// The content-type must contain this marker (case-insensitive).
    Contains(String),
    /// Anything except `text/html`.
    NotHtml,
}

impl ContentClass {
    /// Returns true when `content_type` classifies as a download.
    #[must_use]
    pub fn accepts(&self, content_type: &str) -> bool {
        let content_type = content_type.to_ascii_lowercase();
        match self {
            Self::Any => true,
            Self::Contains(marker) => content_type.contains(&marker.to_ascii_lowercase()),
            Self::NotHtml => !content_type.contains("text/html"),
        }
    }
}

/// HTTP operations used by resolvers and Jobs.
///
/// Implemented by [`HttpClient`]; tests substitute fakes to count in-flight
/// transfers or script failures.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs a GET and returns the whole body of a 2xx response.
    ///
    /// # Errors
    ///
    /// [`FetchError::HttpStatus`] for non-2xx, network/timeout errors otherwise.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Streams a 200 response classified by `class` into `dest`.
    ///
    /// On any error nothing is left at `dest` or at its partial path.
    ///
    /// # Errors
    ///
    /// [`FetchError::HttpStatus`] for non-200, [`FetchError::UnexpectedContent`]
    /// when the content-type does not match, IO and network errors otherwise.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        class: &ContentClass,
    ) -> Result<u64, FetchError>;
}
