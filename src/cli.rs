//! CLI argument definitions using clap derive macros, plus the merge of
//! command-line values over config-file defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, parser::ValueSource};

use linkfetch_core::config::{FileConfig, VerbositySetting};
use linkfetch_core::fetch::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use linkfetch_core::job::JobSettings;
use linkfetch_core::resolver::{
    ApiSettings, DEFAULT_API_BASE, DEFAULT_API_HOST, DEFAULT_DOWNLOAD_MARKER,
};
use linkfetch_core::scheduler::DEFAULT_CONCURRENCY;

/// Download every file listed in a work list, resuming where the last run stopped.
///
/// Completed links are removed from the list file as they finish, so the
/// same command can be re-run until the list is empty.
#[derive(Parser, Debug)]
#[command(name = "linkfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Work list file, one link per line (rewritten as links complete)
    #[arg(short = 'i', long, default_value = "urls.txt")]
    pub input: PathBuf,

    /// Directory receiving downloaded files
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Maximum concurrent jobs (1-100)
    #[arg(
        short = 'c',
        long,
        default_value_t = DEFAULT_CONCURRENCY as u8,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub concurrency: u8,

    /// Fixed delay between retries in seconds (0-3600)
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub retry_delay: u64,

    /// Attempts per link before leaving it for a later run (0 = retry forever)
    #[arg(long, default_value_t = 0)]
    pub max_attempts: u32,

    /// Verify files that already exist instead of trusting them
    #[arg(long)]
    pub verify_existing: bool,

    /// Base URL of the provider metadata API
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Link host resolved through the provider API
    #[arg(long, default_value = DEFAULT_API_HOST)]
    pub api_host: String,

    /// Content-type substring identifying a payload response
    #[arg(long, default_value = DEFAULT_DOWNLOAD_MARKER)]
    pub download_marker: String,

    /// Config file (default: $XDG_CONFIG_HOME/linkfetch/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Log level used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    #[must_use]
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            output_dir: self.output_dir.clone(),
            retry_delay: Duration::from_secs(self.retry_delay),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            trust_existing_files: !self.verify_existing,
        }
    }

    #[must_use]
    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            api_base: self.api_base.clone(),
            api_host: self.api_host.clone(),
            download_marker: self.download_marker.clone(),
        }
    }
}

/// Which arguments were given explicitly on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliValueSources {
    pub output_dir: bool,
    pub concurrency: bool,
    pub retry_delay: bool,
    pub max_attempts: bool,
    pub verify_existing: bool,
    pub api_base: bool,
    pub api_host: bool,
    pub download_marker: bool,
    pub verbose: bool,
    pub quiet: bool,
}

/// Parses the process arguments, exiting on `--help`, `--version` or bad input.
pub fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    (args, value_sources(&matches))
}

fn value_sources(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        output_dir: is_commandline_value(matches, "output_dir"),
        concurrency: is_commandline_value(matches, "concurrency"),
        retry_delay: is_commandline_value(matches, "retry_delay"),
        max_attempts: is_commandline_value(matches, "max_attempts"),
        verify_existing: is_commandline_value(matches, "verify_existing"),
        api_base: is_commandline_value(matches, "api_base"),
        api_host: is_commandline_value(matches, "api_host"),
        download_marker: is_commandline_value(matches, "download_marker"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Fills every argument not given on the command line from the config file.
#[must_use]
pub fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Args {
    let Some(file_config) = file_config else {
        return args;
    };

    if !cli_sources.output_dir
        && let Some(output_dir) = &file_config.output_dir
    {
        args.output_dir = output_dir.clone();
    }
    if !cli_sources.concurrency
        && let Some(concurrency) = file_config.concurrency
    {
        args.concurrency = concurrency;
    }
    if !cli_sources.retry_delay
        && let Some(retry_delay) = file_config.retry_delay_secs
    {
        args.retry_delay = retry_delay;
    }
    if !cli_sources.max_attempts
        && let Some(max_attempts) = file_config.max_attempts
    {
        args.max_attempts = max_attempts;
    }
    if !cli_sources.verify_existing
        && let Some(trust) = file_config.trust_existing_files
    {
        args.verify_existing = !trust;
    }
    if !cli_sources.api_base
        && let Some(api_base) = &file_config.api_base
    {
        args.api_base = api_base.clone();
    }
    if !cli_sources.api_host
        && let Some(api_host) = &file_config.api_host
    {
        args.api_host = api_host.clone();
    }
    if !cli_sources.download_marker
        && let Some(marker) = &file_config.download_marker
    {
        args.download_marker = marker.clone();
    }
    if !cli_sources.verbose
        && !cli_sources.quiet
        && let Some(verbosity) = file_config.verbosity
    {
        apply_config_verbosity(&mut args, verbosity);
    }

    args
}

fn apply_config_verbosity(args: &mut Args, verbosity: VerbositySetting) {
    let (quiet, verbose) = match verbosity {
        VerbositySetting::Default => (false, 0),
        VerbositySetting::Verbose => (false, 1),
        VerbositySetting::Debug => (false, 2),
        VerbositySetting::Quiet => (true, 0),
    };
    args.quiet = quiet;
    args.verbose = verbose;
}

/// HTTP connect and read timeouts in seconds, from the config file or built-in defaults.
#[must_use]
pub fn resolve_http_timeouts(file_config: Option<&FileConfig>) -> (u64, u64) {
    let connect = file_config
        .and_then(|c| c.connect_timeout_secs)
        .unwrap_or(CONNECT_TIMEOUT_SECS);
    let read = file_config
        .and_then(|c| c.read_timeout_secs)
        .unwrap_or(READ_TIMEOUT_SECS);
    (connect, read)
}
