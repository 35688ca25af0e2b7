//! CLI entry point for the linkfetch batch downloader.

use std::sync::Arc;

use anyhow::{Context, Result};
use linkfetch_core::config::load_config_file;
use linkfetch_core::fetch::{Fetcher, HttpClient};
use linkfetch_core::job::JobContext;
use linkfetch_core::resolver::build_default_registry;
use linkfetch_core::scheduler::Scheduler;
use linkfetch_core::shutdown::Shutdown;
use linkfetch_core::worklist::WorkList;
use tracing::{debug, info, warn};

mod cli;

use cli::{apply_config_defaults, parse_cli_with_sources, resolve_http_timeouts};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, sources) = parse_cli_with_sources();

    let file_config = load_config_file(args.config.as_deref())?;
    let args = apply_config_defaults(args, &sources, file_config.as_ref());

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!(input = %args.input.display(), "linkfetch starting");

    let scheduler = Scheduler::new(usize::from(args.concurrency))?;

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory '{}'",
                args.output_dir.display()
            )
        })?;

    let worklist = WorkList::load(&args.input)
        .await
        .with_context(|| format!("Failed to load work list '{}'", args.input.display()))?;
    if worklist.is_empty().await {
        info!("work list is empty, nothing to do");
        return Ok(());
    }

    let (connect_secs, read_secs) = resolve_http_timeouts(file_config.as_ref());
    let client = Arc::new(HttpClient::with_timeouts(connect_secs, read_secs)?);
    let registry =
        build_default_registry(Arc::clone(&client) as Arc<dyn Fetcher>, args.api_settings());
    debug!(?registry, "resolvers ready");

    let shutdown = Arc::new(Shutdown::new());
    spawn_ctrl_c_handler(Arc::clone(&shutdown));

    let ctx =
        JobContext::new(Arc::new(registry), client, args.job_settings()).with_shutdown(shutdown);
    let stats = scheduler.run(Arc::new(worklist), Arc::new(ctx)).await?;

    info!(
        downloaded = stats.completed(),
        already_present = stats.already_present(),
        skipped = stats.skipped(),
        left_pending = stats.deferred(),
        retries = stats.retries(),
        "linkfetch finished"
    );
    Ok(())
}

fn spawn_ctrl_c_handler(shutdown: Arc<Shutdown>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received: finishing in-flight downloads, admitting no new links");
                shutdown.request();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupt signal"),
        }
    });
}
