//! The pending-link set and its crash-safe, line-oriented persistence.
//!
//! The file on disk is always a full snapshot of the links that have not
//! completed yet, one per line. Every mutation rewrites the whole snapshot
//! into `<path>.tmp` and renames it over `<path>`, so a crash mid-write leaves
//! either the old or the new snapshot, never a truncated one.
//!
//! Mutations serialize on a `tokio::sync::Mutex` held across the in-memory
//! delete and the file rewrite. Two Jobs finishing at the same moment are
//! therefore both reflected in the persisted file.

mod error;

pub use error::WorkListError;

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::link::{Link, parse_link_list};

const TMP_SUFFIX: &str = ".tmp";

/// Shared set of links not yet completed, backed by a file.
#[derive(Debug)]
pub struct WorkList {
    path: PathBuf,
    pending: Mutex<BTreeSet<Link>>,
}

impl WorkList {
    /// Reads and normalizes the work list at `path`, then persists the
    /// normalized snapshot once.
    ///
    /// Invalid lines are dropped and duplicates collapsed.
    ///
    /// # Errors
    ///
    /// [`WorkListError::Read`] if the file cannot be read,
    /// [`WorkListError::Persist`] if the normalized snapshot cannot be written.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, WorkListError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkListError::read(path, e))?;

        let parsed = parse_link_list(&text);
        if parsed.discarded > 0 {
            warn!(discarded = parsed.discarded, "dropped lines that are not absolute URLs");
        }
        if parsed.duplicates > 0 {
            debug!(duplicates = parsed.duplicates, "collapsed duplicate links");
        }
        info!(pending = parsed.links.len(), "work list loaded");

        let list = Self::from_links(path, parsed.links);
        list.persist().await?;
        Ok(list)
    }

    /// Builds a work list from already-normalized links without touching disk.
    #[must_use]
    pub fn from_links(path: impl Into<PathBuf>, links: impl IntoIterator<Item = Link>) -> Self {
        Self {
            path: path.into(),
            pending: Mutex::new(links.into_iter().collect()),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the pending links in snapshot order.
    pub async fn pending(&self) -> Vec<Link> {
        self.pending.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    pub async fn contains(&self, link: &Link) -> bool {
        self.pending.lock().await.contains(link)
    }

    /// Removes `link` and rewrites the snapshot under the same lock.
    ///
    /// Returns `false` without touching the file when the link was not pending.
    /// If the rewrite fails the link stays removed in memory; the next
    /// successful rewrite catches the file up.
    ///
    /// # Errors
    ///
    /// [`WorkListError::Persist`] when the snapshot cannot be written.
    #[instrument(skip(self), fields(link = %link))]
    pub async fn remove(&self, link: &Link) -> Result<bool, WorkListError> {
        let mut pending = self.pending.lock().await;
        if !pending.remove(link) {
            debug!("link already absent from work list");
            return Ok(false);
        }
        write_snapshot(&self.path, &render_snapshot(pending.iter())).await?;
        debug!(remaining = pending.len(), "work list persisted");
        Ok(true)
    }

    /// Rewrites the snapshot from the current in-memory set.
    ///
    /// # Errors
    ///
    /// [`WorkListError::Persist`] when the snapshot cannot be written.
    pub async fn persist(&self) -> Result<(), WorkListError> {
        let pending = self.pending.lock().await;
        write_snapshot(&self.path, &render_snapshot(pending.iter())).await
    }
}

/// Renders links as the persisted format: one per line, trailing newline,
/// empty string for an empty set.
pub fn render_snapshot<'a>(links: impl IntoIterator<Item = &'a Link>) -> String {
    let mut out = String::new();
    for link in links {
        out.push_str(link.as_str());
        out.push('\n');
    }
    out
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

async fn write_snapshot(path: &Path, contents: &str) -> Result<(), WorkListError> {
    let tmp = tmp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(WorkListError::persist(path, e));
    }
    Ok(())
}
