//! Metadata API strategy for the hosting provider.
//!
//! Two lookups per link, keyed by the identifier in the link's last path
//! segment:
//!
//! 1. `GET {api_base}/v1/getFileInfo?file={id}` for the MD5 checksum
//! 2. `GET {api_base}/v1/getDownloadLink?file={id}` for the payload URL and filename
//!
//! Both documents carry a `type` discriminant; anything other than
//! `"success"` means the file is gone and the link is skipped for good.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetch::{ContentClass, Fetcher, safe_file_name};
use crate::link::Link;
use crate::verify::Checksum;

use super::{FileInfo, ResolveError, Resolver, ResolverPriority};

/// Default provider API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.filefactory.com";

/// Default link host served by the API strategy.
pub const DEFAULT_API_HOST: &str = "filefactory.com";

/// Default content-type marker identifying a payload response.
pub const DEFAULT_DOWNLOAD_MARKER: &str = "down";

const SUCCESS: &str = "success";

// ==================== API Response Types ====================

/// Envelope shared by both endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// `result` of `getFileInfo`.
#[derive(Debug, Deserialize)]
pub(crate) struct FileInfoResult {
    #[serde(default)]
    pub files: HashMap<String, FileEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEntry {
    pub md5: Option<String>,
}

/// `result` of `getDownloadLink`.
#[derive(Debug, Deserialize)]
pub(crate) struct DownloadLinkResult {
    pub url: Option<String>,
    pub name: Option<String>,
}

/// Endpoint and classification settings for [`ApiResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// API base URL, without trailing slash.
    pub api_base: String,
    /// Link host this strategy handles (compared without `www.`).
    pub api_host: String,
    /// Content-type substring marking a payload response.
    pub download_marker: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            download_marker: DEFAULT_DOWNLOAD_MARKER.to_string(),
        }
    }
}

/// Resolves provider links through the provider's JSON API.
pub struct ApiResolver {
    fetcher: Arc<dyn Fetcher>,
    settings: ApiSettings,
}

impl ApiResolver {
    /// Creates the strategy with the given shared fetcher and settings.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, mut settings: ApiSettings) -> Self {
        settings.api_base = settings.api_base.trim_end_matches('/').to_string();
        settings.api_host = canonical_host(&settings.api_host);
        Self { fetcher, settings }
    }

    /// Returns the effective settings.
    #[must_use]
    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    /// Fetches one endpoint and returns its `result` when the discriminant
    /// is `success`, `None` when the provider reports failure.
    async fn lookup<T: DeserializeOwned>(
        &self,
        link: &Link,
        url: &str,
    ) -> Result<Option<T>, ResolveError> {
        let body = self
            .fetcher
            .fetch_bytes(url)
            .await
            .map_err(|e| ResolveError::fetch(link.as_str(), e))?;

        let envelope: ApiEnvelope = serde_json::from_slice(&body)
            .map_err(|e| ResolveError::decode(link.as_str(), url, e.to_string()))?;

        if envelope.kind != SUCCESS {
            debug!(url = %url, kind = %envelope.kind, "provider reported failure");
            return Ok(None);
        }

        let Some(result) = envelope.result else {
            warn!(url = %url, "success document without result");
            return Ok(None);
        };

        match serde_json::from_value(result) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!(url = %url, error = %e, "success document with unexpected result shape");
                Ok(None)
            }
        }
    }
}

impl ApiResolver {
    /// Makes the payload URL absolute against the API base. Only http(s)
    /// URLs with a host are accepted.
    fn absolute_download_url(&self, raw: &str) -> Option<String> {
        let url = Url::parse(raw).or_else(|_| {
            Url::parse(&format!("{}/", self.settings.api_base))
                .and_then(|base| base.join(raw))
        });
        match url {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                Some(url.into())
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for ApiResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiResolver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Resolver for ApiResolver {
    fn name(&self) -> &'static str {
        "api"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Specialized
    }

    fn can_handle(&self, link: &Link) -> bool {
        link.url()
            .and_then(|url| url.host_str().map(canonical_host))
            .is_some_and(|host| host == self.settings.api_host)
    }

    #[instrument(skip(self), fields(resolver = "api", link = %link))]
    async fn resolve(&self, link: &Link) -> Result<FileInfo, ResolveError> {
        let Some(id) = link.provider_id() else {
            return Ok(FileInfo::unresolvable(link.clone(), "link has no file identifier"));
        };

        let info_url = format!("{}/v1/getFileInfo?file={id}", self.settings.api_base);
        let Some(file_info) = self.lookup::<FileInfoResult>(link, &info_url).await? else {
            return Ok(FileInfo::unresolvable(link.clone(), "provider has no such file"));
        };
        let checksum = pick_entry(&file_info.files, &id)
            .and_then(|entry| entry.md5.as_deref())
            .and_then(Checksum::md5);

        let link_url = format!("{}/v1/getDownloadLink?file={id}", self.settings.api_base);
        let Some(download) = self.lookup::<DownloadLinkResult>(link, &link_url).await? else {
            return Ok(FileInfo::unresolvable(link.clone(), "provider refused a download link"));
        };

        let (Some(raw_url), Some(name)) = (download.url, download.name) else {
            warn!("download link document lacks url or name");
            return Ok(FileInfo::unresolvable(link.clone(), "download link incomplete"));
        };
        let Some(download_url) = self.absolute_download_url(&raw_url) else {
            warn!(url = %raw_url, "download link is not a fetchable URL");
            return Ok(FileInfo::unresolvable(
                link.clone(),
                format!("unusable download URL '{raw_url}'"),
            ));
        };
        let Some(filename) = safe_file_name(&name) else {
            return Ok(FileInfo::unresolvable(
                link.clone(),
                format!("unusable filename '{name}'"),
            ));
        };

        info!(filename = %filename, has_checksum = checksum.is_some(), "resolved via API");
        Ok(
            FileInfo::resolved(link.clone(), Some(id), download_url, filename)
                .with_checksum(checksum)
                .with_content_class(ContentClass::Contains(
                    self.settings.download_marker.clone(),
                )),
        )
    }
}

/// Finds the file entry for `id`, tolerating case differences (links are
/// lowercased, provider keys may not be) and single-entry documents.
fn pick_entry<'a>(files: &'a HashMap<String, FileEntry>, id: &str) -> Option<&'a FileEntry> {
    files
        .get(id)
        .or_else(|| {
            files
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(id))
                .map(|(_, entry)| entry)
        })
        .or_else(|| {
            if files.len() == 1 {
                files.values().next()
            } else {
                None
            }
        })
}

fn canonical_host(host: &str) -> String {
    host.trim()
        .trim_start_matches("www.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::HttpClient;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver_for(server_uri: &str) -> ApiResolver {
        ApiResolver::new(
            Arc::new(HttpClient::new().unwrap()),
            ApiSettings {
                api_base: format!("{server_uri}/"),
                ..ApiSettings::default()
            },
        )
    }

    fn link(id: &str) -> Link {
        Link::parse(&format!("https://www.filefactory.com/file/{id}")).unwrap()
    }

    async fn mount_info(server: &MockServer, id: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/v1/getFileInfo"))
            .and(query_param("file", id))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_link(server: &MockServer, id: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/v1/getDownloadLink"))
            .and(query_param("file", id))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    // ==================== Serde Deserialization Tests ====================

    #[test]
    fn test_envelope_deserialize_success_with_files() {
        let json = serde_json::json!({
            "type": "success",
            "result": {"files": {"abc": {"md5": "d41d8cd98f00b204e9800998ecf8427e"}}}
        });
        let envelope: ApiEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(envelope.kind, "success");
        let result: FileInfoResult = serde_json::from_value(envelope.result.unwrap()).unwrap();
        assert_eq!(
            result.files["abc"].md5.as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
    }

    #[test]
    fn test_envelope_deserialize_error_without_result() {
        let json = serde_json::json!({"type": "error", "message": "file not found"});
        let envelope: ApiEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(envelope.kind, "error");
        assert!(envelope.result.is_none());
    }

    #[test]
    fn test_pick_entry_tolerates_case_and_single_entry() {
        let mut files = HashMap::new();
        files.insert("AbC".to_string(), FileEntry { md5: Some("1".into()) });
        assert_eq!(pick_entry(&files, "abc").unwrap().md5.as_deref(), Some("1"));
        assert_eq!(pick_entry(&files, "zzz").unwrap().md5.as_deref(), Some("1"));

        files.insert("other".to_string(), FileEntry { md5: None });
        assert!(pick_entry(&files, "zzz").is_none());
    }

    // ==================== Strategy Selection ====================

    #[test]
    fn test_can_handle_matches_host_with_and_without_www() {
        let resolver = ApiResolver::new(
            Arc::new(HttpClient::new().unwrap()),
            ApiSettings::default(),
        );
        assert!(resolver.can_handle(&link("abc")));
        assert!(resolver.can_handle(&Link::parse("https://filefactory.com/file/abc").unwrap()));
        assert!(!resolver.can_handle(&Link::parse("https://example.com/file/abc").unwrap()));
        assert_eq!(resolver.priority(), ResolverPriority::Specialized);
        assert_eq!(resolver.name(), "api");
    }

    // ==================== Resolver Integration Tests (wiremock) ====================

    #[tokio::test]
    async fn test_resolve_success_with_checksum() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_info(
            &server,
            "abc",
            serde_json::json!({"type": "success", "result": {"files": {"abc": {"md5": "ABCDEF"}}}}),
        )
        .await;
        mount_link(
            &server,
            "abc",
            serde_json::json!({
                "type": "success",
                "result": {"url": "https://cdn.example/abc.zip", "name": "abc.zip"}
            }),
        )
        .await;

        let info = resolver_for(&server.uri()).resolve(&link("abc")).await.unwrap();
        assert!(!info.resolution_failed);
        assert_eq!(info.provider_id.as_deref(), Some("abc"));
        assert_eq!(info.download_url, "https://cdn.example/abc.zip");
        assert_eq!(info.filename, "abc.zip");
        assert_eq!(info.checksum.unwrap().hex(), "abcdef");
        assert_eq!(info.content_class, ContentClass::Contains("down".to_string()));
    }

    #[tokio::test]
    async fn test_resolve_info_failure_is_permanent() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_info(&server, "gone", serde_json::json!({"type": "error"})).await;

        let info = resolver_for(&server.uri()).resolve(&link("gone")).await.unwrap();
        assert!(info.resolution_failed);
    }

    #[tokio::test]
    async fn test_resolve_download_link_failure_is_permanent() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_info(
            &server,
            "abc",
            serde_json::json!({"type": "success", "result": {"files": {}}}),
        )
        .await;
        mount_link(&server, "abc", serde_json::json!({"type": "error"})).await;

        let info = resolver_for(&server.uri()).resolve(&link("abc")).await.unwrap();
        assert!(info.resolution_failed);
    }

    #[tokio::test]
    async fn test_resolve_relative_download_url_joins_api_base() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_info(
            &server,
            "abc",
            serde_json::json!({"type": "success", "result": {"files": {}}}),
        )
        .await;
        mount_link(
            &server,
            "abc",
            serde_json::json!({"type": "success", "result": {"url": "/dl/abc", "name": "abc.zip"}}),
        )
        .await;

        let info = resolver_for(&server.uri()).resolve(&link("abc")).await.unwrap();
        assert!(!info.resolution_failed);
        assert_eq!(info.download_url, format!("{}/dl/abc", server.uri()));
    }

    #[tokio::test]
    async fn test_resolve_unfetchable_download_url_is_permanent() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        for (id, url) in [("abc", "http://"), ("def", "ftp://cdn.example/def.zip")] {
            mount_info(
                &server,
                id,
                serde_json::json!({"type": "success", "result": {"files": {}}}),
            )
            .await;
            mount_link(
                &server,
                id,
                serde_json::json!({"type": "success", "result": {"url": url, "name": "x.zip"}}),
            )
            .await;

            let info = resolver_for(&server.uri()).resolve(&link(id)).await.unwrap();
            assert!(info.resolution_failed, "{url} should not resolve");
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_md5_yields_no_checksum() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        mount_info(
            &server,
            "abc",
            serde_json::json!({"type": "success", "result": {"files": {"abc": {}}}}),
        )
        .await;
        mount_link(
            &server,
            "abc",
            serde_json::json!({
                "type": "success",
                "result": {"url": "https://cdn.example/a", "name": "a.bin"}
            }),
        )
        .await;

        let info = resolver_for(&server.uri()).resolve(&link("abc")).await.unwrap();
        assert!(!info.resolution_failed);
        assert!(info.checksum.is_none());
    }

    #[tokio::test]
    async fn test_resolve_server_error_is_transient() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/v1/getFileInfo"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = resolver_for(&server.uri()).resolve(&link("abc")).await.unwrap_err();
        assert!(matches!(err, ResolveError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_resolve_non_json_body_is_transient() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/v1/getFileInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = resolver_for(&server.uri()).resolve(&link("abc")).await.unwrap_err();
        assert!(matches!(err, ResolveError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_resolve_link_without_identifier_is_permanent() {
        let resolver = ApiResolver::new(
            Arc::new(HttpClient::new().unwrap()),
            ApiSettings::default(),
        );
        let bare = Link::parse("https://www.filefactory.com").unwrap();
        let info = resolver.resolve(&bare).await.unwrap();
        assert!(info.resolution_failed);
    }
}
