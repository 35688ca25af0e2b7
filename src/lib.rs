//! linkfetch core library
//!
//! Downloads every file named by a list of links, with a crash-safe work
//! list that shrinks as links complete so an interrupted run resumes where
//! it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`link`] - Link normalization and work list file parsing
//! - [`resolver`] - Link to download metadata (provider API or page scraping)
//! - [`fetch`] - HTTP client with streaming, classified payload downloads
//! - [`verify`] - Streaming MD5/SHA-256 checksums
//! - [`job`] - Per-link resolve/download/verify/complete state machine
//! - [`worklist`] - Pending-link set with atomic snapshot persistence
//! - [`scheduler`] - Bounded-concurrency Job dispatcher
//! - [`shutdown`] - Graceful stop signal
//! - [`config`] - TOML configuration file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod fetch;
pub mod job;
pub mod link;
pub mod resolver;
pub mod scheduler;
pub mod shutdown;
pub mod verify;
pub mod worklist;

mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use fetch::{ContentClass, FetchError, Fetcher, HttpClient};
pub use job::{DeferReason, JobContext, JobOutcome, JobReport, JobSettings, RetryTimer, TokioTimer};
pub use link::{Link, parse_link_list};
pub use resolver::{FileInfo, ResolveError, Resolver, ResolverRegistry};
pub use scheduler::{DEFAULT_CONCURRENCY, RunStats, Scheduler, SchedulerError};
pub use shutdown::Shutdown;
pub use verify::{Checksum, ChecksumAlgorithm};
pub use worklist::{WorkList, WorkListError};
