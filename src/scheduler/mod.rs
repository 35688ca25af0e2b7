//! Bounded-concurrency dispatcher: one Job per pending link.
//!
//! # Concurrency Model
//!
//! - Each Job runs in its own Tokio task inside a [`JoinSet`]
//! - An owned semaphore permit is acquired before spawning and held for the
//!   whole Job, so at most `concurrency` Jobs are active at once
//! - A finished Job drops its permit, admitting the next waiting link
//! - After a shutdown request no further Jobs are admitted; running Jobs
//!   finish on their own terms
//!
//! Job internals never surface as errors here. The Scheduler only sees
//! [`JobReport`]s and tallies them into [`RunStats`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::job::{JobContext, JobOutcome, JobReport, run_job};
use crate::worklist::WorkList;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default admission ceiling.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Error type for scheduler construction and runs.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Tallies from one run. Atomic so Job tasks can record directly.
#[derive(Debug, Default)]
pub struct RunStats {
    completed: AtomicUsize,
    already_present: AtomicUsize,
    skipped: AtomicUsize,
    deferred: AtomicUsize,
    retries: AtomicUsize,
}

impl RunStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Links downloaded during this run.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Links whose file was already on disk.
    #[must_use]
    pub fn already_present(&self) -> usize {
        self.already_present.load(Ordering::SeqCst)
    }

    /// Links the provider reported as unavailable.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Links left pending (retry cap, shutdown, collision, panic, not admitted).
    #[must_use]
    pub fn deferred(&self) -> usize {
        self.deferred.load(Ordering::SeqCst)
    }

    /// Retry waits taken across all Jobs.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    /// Links that left the work list.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.completed() + self.already_present() + self.skipped()
    }

    fn record(&self, report: &JobReport) {
        let counter = match report.outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::AlreadyPresent => &self.already_present,
            JobOutcome::Skipped => &self.skipped,
            JobOutcome::Deferred(_) => &self.deferred,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let retries = usize::try_from(report.retries).unwrap_or(usize::MAX);
        self.retries.fetch_add(retries, Ordering::SeqCst);
    }

    fn add_deferred(&self, count: usize) {
        self.deferred.fetch_add(count, Ordering::SeqCst);
    }
}

/// Launches Jobs for every pending link under an admission ceiling.
#[derive(Debug)]
pub struct Scheduler {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl Scheduler {
    /// Creates a scheduler admitting at most `concurrency` Jobs at once.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] if the value is outside 1-100.
    ///
    /// # Example
    ///
    /// ```
    /// use linkfetch_core::scheduler::Scheduler;
    ///
    /// let scheduler = Scheduler::new(5).unwrap();
    /// assert_eq!(scheduler.concurrency(), 5);
    /// ```
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(SchedulerError::InvalidConcurrency { value: concurrency });
        }
        debug!(concurrency, "creating scheduler");
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs one Job per pending link and returns once every Job has ended.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SemaphoreClosed`] if admission breaks down.
    /// Individual Job failures never cause this method to error.
    #[instrument(skip(self, worklist, ctx), fields(path = %worklist.path().display()))]
    pub async fn run(
        &self,
        worklist: Arc<WorkList>,
        ctx: Arc<JobContext>,
    ) -> Result<RunStats, SchedulerError> {
        let stats = RunStats::new();
        let links = worklist.pending().await;
        let total = links.len();
        let mut tasks = JoinSet::new();
        let mut launched = 0usize;

        info!(total, concurrency = self.concurrency, "starting run");

        for link in links {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| SchedulerError::SemaphoreClosed)?;

            if ctx.shutdown.is_requested() {
                info!(
                    not_admitted = total - launched,
                    "shutdown requested, admitting no more links"
                );
                break;
            }

            let worklist = Arc::clone(&worklist);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let _permit = permit;
                run_job(&ctx, &worklist, link).await
            });
            launched += 1;

            // Drain finished Jobs so reports do not pile up.
            while let Some(joined) = tasks.try_join_next() {
                record_joined(&stats, joined);
            }
        }

        debug!(in_flight = tasks.len(), "waiting for jobs to finish");
        while let Some(joined) = tasks.join_next().await {
            record_joined(&stats, joined);
        }
        stats.add_deferred(total - launched);

        info!(
            completed = stats.completed(),
            already_present = stats.already_present(),
            skipped = stats.skipped(),
            deferred = stats.deferred(),
            retries = stats.retries(),
            "run complete"
        );
        Ok(stats)
    }
}

fn record_joined(stats: &RunStats, joined: Result<JobReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => stats.record(&report),
        Err(e) => {
            warn!(error = %e, "job task panicked");
            stats.add_deferred(1);
        }
    }
}
