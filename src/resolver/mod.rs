//! Link resolution: turning a [`Link`] into concrete download metadata.
//!
//! # Architecture
//!
//! - [`Resolver`] - Async trait every strategy implements
//! - [`ResolverRegistry`] - Priority-ordered strategy selection by link shape
//! - [`ApiResolver`] - Provider metadata API strategy (identifier lookup, checksum, download link)
//! - [`PageResolver`] - HTML page strategy (scrapes the download anchor from the link's page)
//! - [`FileInfo`] - Resolution result consumed by the Job
//!
//! Resolvers never retry. Transient failures surface as [`ResolveError`] and
//! the Job's retry loop handles them; permanent "not available" answers are
//! reported as [`FileInfo::unresolvable`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use linkfetch_core::fetch::HttpClient;
//! use linkfetch_core::link::Link;
//! use linkfetch_core::resolver::{ApiSettings, Resolver, build_default_registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(HttpClient::new()?);
//! let registry = build_default_registry(client, ApiSettings::default());
//! let link = Link::parse("https://www.filefactory.com/file/abc123").ok_or("bad link")?;
//! let info = registry.resolve(&link).await?;
//! println!("{} -> {}", info.download_url, info.filename);
//! # Ok(())
//! # }
//! ```

mod api;
mod error;
mod page;
mod registry;

pub use api::{
    ApiResolver, ApiSettings, DEFAULT_API_BASE, DEFAULT_API_HOST, DEFAULT_DOWNLOAD_MARKER,
};
pub use error::ResolveError;
pub use page::PageResolver;
pub use registry::{ResolverRegistry, build_default_registry};

use async_trait::async_trait;

use crate::fetch::ContentClass;
use crate::link::Link;
use crate::verify::Checksum;

/// Priority level for strategy ordering.
///
/// Derives `Ord` so that `Specialized < Fallback` for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolverPriority {
    /// Provider-specific strategy matched by host.
    Specialized = 0,
    /// Generic strategy that accepts any link.
    Fallback = 1,
}

/// Resolved metadata for one link. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// The source link.
    pub link: Link,
    /// Provider-assigned identifier derived from the link, when known.
    pub provider_id: Option<String>,
    /// Concrete payload URL.
    pub download_url: String,
    /// Target filename inside the download directory.
    pub filename: String,
    /// Expected content checksum, when the provider publishes one.
    pub checksum: Option<Checksum>,
    /// How to recognise the payload response.
    pub content_class: ContentClass,
    /// The provider reported the resource as unavailable. Permanent.
    pub resolution_failed: bool,
    /// Human-readable reason accompanying `resolution_failed`.
    pub failure_reason: Option<String>,
}

impl FileInfo {
    /// Creates a successfully resolved entry without checksum.
    #[must_use]
    pub fn resolved(
        link: Link,
        provider_id: Option<String>,
        download_url: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            link,
            provider_id,
            download_url: download_url.into(),
            filename: filename.into(),
            checksum: None,
            content_class: ContentClass::Any,
            resolution_failed: false,
            failure_reason: None,
        }
    }

    /// Creates an entry marking the link as permanently unresolvable.
    #[must_use]
    pub fn unresolvable(link: Link, reason: impl Into<String>) -> Self {
        let provider_id = link.provider_id();
        Self {
            link,
            provider_id,
            download_url: String::new(),
            filename: String::new(),
            checksum: None,
            content_class: ContentClass::Any,
            resolution_failed: true,
            failure_reason: Some(reason.into()),
        }
    }

    /// Sets the expected checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the payload content classification.
    #[must_use]
    pub fn with_content_class(mut self, content_class: ContentClass) -> Self {
        self.content_class = content_class;
        self
    }
}

/// Trait that all resolution strategies implement.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via `Box<dyn Resolver>`
/// and `Arc<dyn Resolver>`.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Returns the strategy name (e.g., "api", "page").
    fn name(&self) -> &str;

    /// Returns the strategy priority.
    fn priority(&self) -> ResolverPriority;

    /// Returns true if this strategy understands the link's shape.
    fn can_handle(&self, link: &Link) -> bool;

    /// Resolves the link into download metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] only for transient failures; permanent
    /// unavailability is an `Ok` with `resolution_failed` set.
    async fn resolve(&self, link: &Link) -> Result<FileInfo, ResolveError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn link() -> Link {
        Link::parse("https://host.example/file/abc").unwrap()
    }

    #[test]
    fn test_resolver_priority_ordering() {
        assert!(ResolverPriority::Specialized < ResolverPriority::Fallback);
    }

    #[test]
    fn test_file_info_resolved_defaults() {
        let info = FileInfo::resolved(link(), Some("abc".into()), "https://cdn/x.zip", "x.zip");
        assert!(!info.resolution_failed);
        assert!(info.checksum.is_none());
        assert_eq!(info.content_class, ContentClass::Any);
        assert_eq!(info.filename, "x.zip");
    }

    #[test]
    fn test_file_info_unresolvable_keeps_provider_id() {
        let info = FileInfo::unresolvable(link(), "gone");
        assert!(info.resolution_failed);
        assert_eq!(info.provider_id.as_deref(), Some("abc"));
        assert_eq!(info.failure_reason.as_deref(), Some("gone"));
    }

    #[test]
    fn test_file_info_builders() {
        let info = FileInfo::resolved(link(), None, "u", "f")
            .with_checksum(Checksum::md5("ABC"))
            .with_content_class(ContentClass::NotHtml);
        assert_eq!(info.checksum.unwrap().hex(), "abc");
        assert_eq!(info.content_class, ContentClass::NotHtml);
    }
}
