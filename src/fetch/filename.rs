//! Filename helpers: sanitizing provider-supplied names and naming partial files.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Suffix appended to the destination while a transfer is in progress.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Reduces a provider-supplied filename to one safe path component.
///
/// Path separators and reserved characters become `_`; names that would
/// still resolve outside the download directory (`.`/`..`) are rejected.
/// Returns `None` when nothing usable remains.
#[must_use]
pub fn safe_file_name(name: &str) -> Option<String> {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.trim_matches(|c| c == '_' || c == '.').is_empty() {
        return None;
    }
    if !is_single_normal_component(&sanitized) {
        return None;
    }
    Some(sanitized)
}

fn is_single_normal_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Path used while streaming: `file.zip` becomes `file.zip.part`.
#[must_use]
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(PARTIAL_SUFFIX);
    PathBuf::from(os)
}

/// Filename from the last non-empty URL path segment, percent-decoded.
#[must_use]
pub fn filename_from_url(url: &Url) -> Option<String> {
    let last = url
        .path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())?;
    let decoded = urlencoding::decode(last)
        .map_or_else(|_| last.to_string(), std::borrow::Cow::into_owned);
    safe_file_name(&decoded)
}
