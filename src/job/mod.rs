//! Per-link Job: the resolve, check, download, verify, complete state machine.
//!
//! ```text
//! Resolving ──► Skipped
//!     │
//!     ▼
//! Checking ──► AlreadyDone
//!     │
//!     ▼
//! Downloading ◄──┐ (retry after the fixed delay)
//!     │          │
//!     ▼          │
//! Verifying ─────┘ (mismatch: file deleted first)
//!     │
//!     ▼
//! Completing ──► Done
//! ```
//!
//! The Job is the single retry authority. Transient resolution errors,
//! transfer errors and checksum mismatches all wait the same fixed delay and
//! try again, forever unless a retry cap is configured. Only a permanent
//! resolution failure ends the Job without a file on disk. Nothing that
//! happens inside a Job is surfaced to the Scheduler as an error.

mod timer;

pub use timer::{RetryTimer, TokioTimer};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, error, info, instrument, warn};

use crate::fetch::{FetchError, Fetcher, safe_file_name};
use crate::link::Link;
use crate::resolver::{FileInfo, Resolver};
use crate::shutdown::Shutdown;
use crate::verify::{Checksum, Verification, verify_file};
use crate::worklist::WorkList;

/// Default fixed delay between retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Knobs shared by every Job of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Directory receiving downloaded files.
    pub output_dir: PathBuf,
    /// Fixed delay before each retry.
    pub retry_delay: Duration,
    /// Attempts allowed per phase before the link is deferred. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Treat an existing target file as complete without verifying it.
    pub trust_existing_files: bool,
}

impl JobSettings {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
            trust_existing_files: true,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Run-wide record of which link owns each resolved filename.
#[derive(Debug, Default)]
pub struct FilenameClaims {
    claims: DashMap<String, Link>,
}

impl FilenameClaims {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `filename` for `link`.
    ///
    /// Claiming again for the same link succeeds.
    ///
    /// # Errors
    ///
    /// Returns the link that already owns the filename.
    pub fn claim(&self, filename: &str, link: &Link) -> Result<(), Link> {
        match self.claims.entry(filename.to_string()) {
            Entry::Occupied(owner) if owner.get() != link => Err(owner.get().clone()),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(link.clone());
                Ok(())
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.claims.len()
    }
}

/// Everything a Job needs besides the work list. Shared by all Jobs of a run.
pub struct JobContext {
    pub resolver: Arc<dyn Resolver>,
    pub fetcher: Arc<dyn Fetcher>,
    pub timer: Arc<dyn RetryTimer>,
    pub claims: FilenameClaims,
    pub shutdown: Arc<Shutdown>,
    pub settings: JobSettings,
}

impl JobContext {
    /// Creates a context with the production timer and a fresh shutdown handle.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
        settings: JobSettings,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            timer: Arc::new(TokioTimer),
            claims: FilenameClaims::new(),
            shutdown: Arc::new(Shutdown::new()),
            settings,
        }
    }

    #[must_use]
    pub fn with_timer(mut self, timer: Arc<dyn RetryTimer>) -> Self {
        self.timer = timer;
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("resolver", &self.resolver.name())
            .field("claims", &self.claims.len())
            .field("shutdown", &self.shutdown.is_requested())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Why a Job stopped without reaching a terminal state. The link stays pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// The configured attempt cap was reached.
    RetriesExhausted { attempts: u32 },
    /// Shutdown was requested while the Job waited to retry.
    ShutdownRequested,
    /// Another link already resolved to the same filename in this run.
    FilenameCollision { other: Link },
    /// The resolver returned a filename that is not a single path component.
    UnusableFilename { filename: String },
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted { attempts } => write!(f, "gave up after {attempts} attempts"),
            Self::ShutdownRequested => f.write_str("shutdown requested"),
            Self::FilenameCollision { other } => write!(f, "filename already claimed by {other}"),
            Self::UnusableFilename { filename } => write!(f, "unusable filename '{filename}'"),
        }
    }
}

/// How a Job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Downloaded (and verified when a checksum was known).
    Completed,
    /// The target file already existed and was accepted.
    AlreadyPresent,
    /// The provider reported the link as permanently unavailable.
    Skipped,
    /// Stopped early; the link remains in the work list.
    Deferred(DeferReason),
}

impl JobOutcome {
    /// Returns true when the link left the work list.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Deferred(_))
    }
}

/// Result of one Job, reported to the Scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub link: Link,
    pub outcome: JobOutcome,
    /// Retry waits taken, across resolution and download.
    pub retries: u32,
}

/// Drives one link through the state machine.
#[instrument(skip(ctx, worklist, link), fields(link = %link))]
pub async fn run_job(ctx: &JobContext, worklist: &WorkList, link: Link) -> JobReport {
    let mut job = Job {
        ctx,
        worklist,
        link,
        retries: 0,
    };
    let outcome = job.drive().await;
    match &outcome {
        JobOutcome::Deferred(reason) => {
            warn!(link = %job.link, %reason, retries = job.retries, "job deferred");
        }
        other => debug!(link = %job.link, outcome = ?other, retries = job.retries, "job finished"),
    }
    JobReport {
        link: job.link,
        outcome,
        retries: job.retries,
    }
}

struct Job<'a> {
    ctx: &'a JobContext,
    worklist: &'a WorkList,
    link: Link,
    retries: u32,
}

enum ExistingFile {
    Accept,
    Download,
}

impl Job<'_> {
    async fn drive(&mut self) -> JobOutcome {
        let info = match self.resolve().await {
            Ok(info) => info,
            Err(outcome) => return outcome,
        };

        if info.resolution_failed {
            info!(
                link = %self.link,
                reason = info.failure_reason.as_deref().unwrap_or("unspecified"),
                "link unresolvable, skipping"
            );
            self.complete().await;
            return JobOutcome::Skipped;
        }

        let Some(filename) = safe_file_name(&info.filename) else {
            warn!(
                link = %self.link,
                filename = %info.filename,
                "resolved filename is unusable; leaving this link pending"
            );
            return JobOutcome::Deferred(DeferReason::UnusableFilename {
                filename: info.filename,
            });
        };

        if let Err(other) = self.ctx.claims.claim(&filename, &self.link) {
            warn!(
                link = %self.link,
                other = %other,
                filename = %filename,
                "two links resolve to the same filename; leaving this one pending"
            );
            return JobOutcome::Deferred(DeferReason::FilenameCollision { other });
        }

        let dest = self.ctx.settings.output_dir.join(&filename);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            match self.check_existing(&dest, info.checksum.as_ref()).await {
                ExistingFile::Accept => {
                    info!(link = %self.link, filename = %filename, "file already present");
                    self.complete().await;
                    return JobOutcome::AlreadyPresent;
                }
                ExistingFile::Download => {}
            }
        }

        self.download(&info, &filename, &dest).await
    }

    async fn resolve(&mut self) -> Result<FileInfo, JobOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.ctx.resolver.resolve(&self.link).await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    warn!(link = %self.link, attempt, error = %e, "resolution failed");
                    if let Some(outcome) = self.pause(attempt).await {
                        return Err(outcome);
                    }
                }
            }
        }
    }

    async fn check_existing(&self, dest: &Path, checksum: Option<&Checksum>) -> ExistingFile {
        if self.ctx.settings.trust_existing_files {
            return ExistingFile::Accept;
        }
        let Some(expected) = checksum else {
            debug!(
                path = %dest.display(),
                "no checksum to check existing file against, downloading again"
            );
            return ExistingFile::Download;
        };
        match verify_file(dest, expected).await {
            Ok(Verification::Match) => ExistingFile::Accept,
            Ok(Verification::Mismatch { actual }) => {
                warn!(
                    path = %dest.display(),
                    expected = %expected,
                    actual = %actual,
                    "existing file fails verification, replacing"
                );
                remove_quietly(dest).await;
                ExistingFile::Download
            }
            Err(e) => {
                warn!(error = %e, "cannot verify existing file, downloading again");
                ExistingFile::Download
            }
        }
    }

    async fn download(&mut self, info: &FileInfo, filename: &str, dest: &Path) -> JobOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(link = %self.link, filename, attempt, "downloading");

            match self
                .ctx
                .fetcher
                .fetch_to_file(&info.download_url, dest, &info.content_class)
                .await
            {
                Ok(bytes) => {
                    if self.verified(info, dest).await {
                        info!(link = %self.link, filename, bytes, attempt, "download complete");
                        self.complete().await;
                        return JobOutcome::Completed;
                    }
                }
                Err(e) => {
                    let content_type = match &e {
                        FetchError::UnexpectedContent { content_type, .. } => {
                            Some(content_type.as_str())
                        }
                        _ => None,
                    };
                    warn!(
                        link = %self.link,
                        filename,
                        url = %info.download_url,
                        status = ?e.status(),
                        content_type = ?content_type,
                        attempt,
                        error = %e,
                        "download failed"
                    );
                }
            }

            if let Some(outcome) = self.pause(attempt).await {
                return outcome;
            }
        }
    }

    /// Checks the downloaded file. A rejected file is deleted.
    async fn verified(&self, info: &FileInfo, dest: &Path) -> bool {
        let Some(expected) = &info.checksum else {
            return true;
        };
        match verify_file(dest, expected).await {
            Ok(Verification::Match) => {
                debug!(link = %self.link, checksum = %expected, "checksum verified");
                true
            }
            Ok(Verification::Mismatch { actual }) => {
                warn!(
                    link = %self.link,
                    path = %dest.display(),
                    expected = %expected,
                    actual = %actual,
                    "checksum mismatch, deleting download"
                );
                remove_quietly(dest).await;
                false
            }
            Err(e) => {
                warn!(link = %self.link, error = %e, "cannot hash download, deleting it");
                remove_quietly(dest).await;
                false
            }
        }
    }

    /// Waits the retry delay. Returns an outcome when the Job must stop instead.
    async fn pause(&mut self, attempts: u32) -> Option<JobOutcome> {
        let settings = &self.ctx.settings;
        if settings.max_attempts.is_some_and(|max| attempts >= max) {
            warn!(link = %self.link, attempts, "retry limit reached");
            return Some(JobOutcome::Deferred(DeferReason::RetriesExhausted { attempts }));
        }
        if self.ctx.shutdown.is_requested() {
            return Some(JobOutcome::Deferred(DeferReason::ShutdownRequested));
        }

        self.retries += 1;
        let delay = settings.retry_delay;
        debug!(
            link = %self.link,
            delay_ms = delay.as_millis(),
            next_attempt = attempts + 1,
            "waiting before retry"
        );
        tokio::select! {
            () = self.ctx.timer.sleep(delay) => None,
            () = self.ctx.shutdown.wait() => {
                info!(link = %self.link, "shutdown requested during retry wait");
                Some(JobOutcome::Deferred(DeferReason::ShutdownRequested))
            }
        }
    }

    /// Removes the link from the work list. A persistence failure is logged;
    /// the file on disk makes the next run finish the link as already present.
    async fn complete(&self) {
        if let Err(e) = self.worklist.remove(&self.link).await {
            error!(link = %self.link, error = %e, "failed to persist work list");
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::fetch::ContentClass;
    use crate::resolver::{ResolveError, ResolverPriority};

    struct StaticResolver {
        info: FileInfo,
        failures_first: AtomicUsize,
    }

    #[async_trait]
    impl Resolver for StaticResolver {
        fn name(&self) -> &str {
            "static"
        }
        fn priority(&self) -> ResolverPriority {
            ResolverPriority::Specialized
        }
        fn can_handle(&self, _link: &Link) -> bool {
            true
        }
        async fn resolve(&self, link: &Link) -> Result<FileInfo, ResolveError> {
            if self
                .failures_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ResolveError::decode(link.as_str(), "https://api", "garbled"));
            }
            let mut info = self.info.clone();
            info.link = link.clone();
            Ok(info)
        }
    }

    /// Replays scripted responses; `Ok(body)` writes the body to `dest`.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<&'static str, u16>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<&'static str, u16>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::http_status(url, 500))
        }

        async fn fetch_to_file(
            &self,
            url: &str,
            dest: &Path,
            _class: &ContentClass,
        ) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Err(500));
            match next {
                Ok(body) => {
                    tokio::fs::write(dest, body).await.unwrap();
                    Ok(body.len() as u64)
                }
                Err(status) => Err(FetchError::http_status(url, status)),
            }
        }
    }

    #[derive(Default)]
    struct RecordingTimer {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl RetryTimer for RecordingTimer {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    const HELLO_MD5: &str = "b1946ac92492d2347c6235b4d2611184";

    fn link() -> Link {
        Link::parse("https://host.example/file/abc").unwrap()
    }

    fn resolved(checksum: Option<&str>) -> FileInfo {
        FileInfo::resolved(link(), Some("abc".into()), "https://cdn.example/abc", "abc.bin")
            .with_checksum(checksum.and_then(Checksum::md5))
    }

    struct Harness {
        dir: TempDir,
        worklist: WorkList,
        fetcher: Arc<ScriptedFetcher>,
        timer: Arc<RecordingTimer>,
        ctx: JobContext,
    }

    fn harness(
        info: FileInfo,
        resolve_failures: usize,
        script: Vec<Result<&'static str, u16>>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let worklist = WorkList::from_links(dir.path().join("urls.txt"), [link()]);
        let fetcher = Arc::new(ScriptedFetcher::new(script));
        let timer = Arc::new(RecordingTimer::default());
        let resolver = Arc::new(StaticResolver {
            info,
            failures_first: AtomicUsize::new(resolve_failures),
        });
        let ctx = JobContext::new(
            resolver,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            JobSettings::new(dir.path()),
        )
        .with_timer(Arc::clone(&timer) as Arc<dyn RetryTimer>);
        Harness {
            dir,
            worklist,
            fetcher,
            timer,
            ctx,
        }
    }

    #[test]
    fn test_job_settings_defaults() {
        let settings = JobSettings::default();
        assert_eq!(settings.retry_delay, Duration::from_secs(60));
        assert_eq!(settings.max_attempts, None);
        assert!(settings.trust_existing_files);
    }

    #[test]
    fn test_filename_claims() {
        let claims = FilenameClaims::new();
        let a = Link::parse("https://a.example/1").unwrap();
        let b = Link::parse("https://b.example/1").unwrap();
        assert!(claims.claim("f.zip", &a).is_ok());
        assert!(claims.claim("f.zip", &a).is_ok());
        assert_eq!(claims.claim("f.zip", &b), Err(a));
        assert_eq!(claims.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_link_is_skipped_and_removed() {
        let h = harness(FileInfo::unresolvable(link(), "gone"), 0, vec![]);
        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(report.outcome, JobOutcome::Skipped);
        assert!(h.worklist.is_empty().await);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_resolve_errors_are_retried() {
        let h = harness(resolved(None), 2, vec![Ok("hello\n")]);
        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(report.outcome, JobOutcome::Completed);
        assert_eq!(report.retries, 2);
        assert_eq!(h.timer.delays.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_file_is_trusted_by_default() {
        let h = harness(resolved(Some(HELLO_MD5)), 0, vec![]);
        std::fs::write(h.dir.path().join("abc.bin"), "stale").unwrap();

        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(report.outcome, JobOutcome::AlreadyPresent);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(h.worklist.is_empty().await);
    }

    #[tokio::test]
    async fn test_verify_existing_replaces_corrupt_file() {
        let mut h = harness(resolved(Some(HELLO_MD5)), 0, vec![Ok("hello\n")]);
        h.ctx.settings.trust_existing_files = false;
        let target = h.dir.path().join("abc.bin");
        std::fs::write(&target, "stale").unwrap();

        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(report.outcome, JobOutcome::Completed);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello\n");
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verify_existing_accepts_matching_file() {
        let mut h = harness(resolved(Some(HELLO_MD5)), 0, vec![]);
        h.ctx.settings.trust_existing_files = false;
        std::fs::write(h.dir.path().join("abc.bin"), "hello\n").unwrap();

        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(report.outcome, JobOutcome::AlreadyPresent);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_cap_defers_and_keeps_link() {
        let mut h = harness(resolved(None), 0, vec![Err(503), Err(503), Err(503)]);
        h.ctx.settings.max_attempts = Some(3);

        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(
            report.outcome,
            JobOutcome::Deferred(DeferReason::RetriesExhausted { attempts: 3 })
        );
        assert_eq!(report.retries, 2);
        assert!(h.worklist.contains(&link()).await);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_deletes_and_retries() {
        let h = harness(resolved(Some(HELLO_MD5)), 0, vec![Ok("corrupt"), Ok("hello\n")]);
        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(report.outcome, JobOutcome::Completed);
        assert_eq!(report.retries, 1);
        assert_eq!(
            std::fs::read_to_string(h.dir.path().join("abc.bin")).unwrap(),
            "hello\n"
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_retrying() {
        let h = harness(resolved(None), 0, vec![Err(500)]);
        h.ctx.shutdown.request();
        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(
            report.outcome,
            JobOutcome::Deferred(DeferReason::ShutdownRequested)
        );
        assert!(h.worklist.contains(&link()).await);
        assert!(h.timer.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unusable_filename_keeps_link_pending() {
        let info = FileInfo::resolved(link(), Some("abc".into()), "https://cdn.example/abc", "..");
        let h = harness(info, 0, vec![]);

        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(
            report.outcome,
            JobOutcome::Deferred(DeferReason::UnusableFilename {
                filename: "..".to_string()
            })
        );
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(h.worklist.contains(&link()).await);
    }

    #[tokio::test]
    async fn test_filename_collision_is_deferred() {
        let h = harness(resolved(None), 0, vec![]);
        let other = Link::parse("https://other.example/file/abc").unwrap();
        h.ctx.claims.claim("abc.bin", &other).unwrap();

        let report = run_job(&h.ctx, &h.worklist, link()).await;
        assert_eq!(
            report.outcome,
            JobOutcome::Deferred(DeferReason::FilenameCollision { other })
        );
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(h.worklist.contains(&link()).await);
    }
}
