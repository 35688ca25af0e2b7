//! HTML page strategy: fetch the link's page and scrape the download anchor.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, instrument};
use url::Url;

use crate::fetch::{ContentClass, FetchError, Fetcher, filename_from_url};
use crate::link::Link;
use crate::verify::Checksum;

use super::{FileInfo, ResolveError, Resolver, ResolverPriority};

/// Page extensions that never count as a payload when guessing a fallback anchor.
const PAGE_EXTENSIONS: [&str; 7] = ["html", "htm", "php", "asp", "aspx", "jsp", "cgi"];

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?is)<a\s[^>]*>"));
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?is)\bhref\s*=\s*["']([^"']+)["']"#));
static DOWNLOAD_MARK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)\b(?:id|class)\s*=\s*["'][^"']*download[^"']*["']"#)
});
static MD5_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)\bmd5\b\W{0,3}([0-9a-f]{32})\b"));

/// Resolves any link by scraping its HTML page. Acts as the fallback strategy.
pub struct PageResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl PageResolver {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

impl std::fmt::Debug for PageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl Resolver for PageResolver {
    fn name(&self) -> &'static str {
        "page"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Fallback
    }

    fn can_handle(&self, link: &Link) -> bool {
        link.url()
            .is_some_and(|url| matches!(url.scheme(), "http" | "https"))
    }

    #[instrument(skip(self), fields(resolver = "page", link = %link))]
    async fn resolve(&self, link: &Link) -> Result<FileInfo, ResolveError> {
        let Some(page_url) = link.url() else {
            return Ok(FileInfo::unresolvable(link.clone(), "link is not a URL"));
        };

        let body = match self.fetcher.fetch_bytes(link.as_str()).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status, .. }) if matches!(status, 404 | 410) => {
                debug!(status, "page reports file missing");
                return Ok(FileInfo::unresolvable(
                    link.clone(),
                    format!("page answered HTTP {status}"),
                ));
            }
            Err(e) => return Err(ResolveError::fetch(link.as_str(), e)),
        };
        let html = String::from_utf8_lossy(&body);

        let Some(download_url) = extract_download_url(&html, &page_url) else {
            return Ok(FileInfo::unresolvable(link.clone(), "no download link on page"));
        };
        let Some(filename) = filename_from_url(&download_url) else {
            return Ok(FileInfo::unresolvable(
                link.clone(),
                format!("cannot derive filename from {download_url}"),
            ));
        };
        let checksum = extract_md5(&html).and_then(|hex| Checksum::md5(&hex));

        info!(filename = %filename, has_checksum = checksum.is_some(), "resolved via page");
        Ok(
            FileInfo::resolved(link.clone(), link.provider_id(), download_url, filename)
                .with_checksum(checksum)
                .with_content_class(ContentClass::NotHtml),
        )
    }
}

/// Finds the payload URL on a page.
///
/// Prefers an anchor whose `id` or `class` mentions `download`; otherwise the
/// first absolute link whose path ends in a non-page file extension.
pub(crate) fn extract_download_url(html: &str, page_url: &Url) -> Option<Url> {
    let anchors: Vec<&str> = ANCHOR_RE.find_iter(html).map(|m| m.as_str()).collect();

    let marked = anchors
        .iter()
        .filter(|tag| DOWNLOAD_MARK_RE.is_match(tag))
        .find_map(|tag| href_of(tag))
        .and_then(|href| page_url.join(&href).ok());
    if marked.is_some() {
        return marked;
    }

    anchors
        .iter()
        .filter_map(|tag| href_of(tag))
        .filter_map(|href| page_url.join(&href).ok())
        .find(|url| matches!(url.scheme(), "http" | "https") && has_file_extension(url))
}

fn href_of(tag: &str) -> Option<String> {
    HREF_RE
        .captures(tag)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().replace("&amp;", "&"))
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
}

fn has_file_extension(url: &Url) -> bool {
    let Some(last) = url.path_segments().and_then(|mut s| s.next_back()) else {
        return false;
    };
    let Some((stem, ext)) = last.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && !PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Picks up a published MD5 digest from page text (`md5: <32 hex>`).
pub(crate) fn extract_md5(html: &str) -> Option<String> {
    MD5_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}
