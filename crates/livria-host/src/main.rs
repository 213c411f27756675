//! LIVRIA worker host
//!
//! Runs the offline worker outside a browser: installs it against a live
//! origin with an on-disk cache, activates it, then replays fetch events
//! for the paths given on the command line and prints what the worker
//! answered.
//!
//! ```text
//! livria-host --origin http://localhost:3000/ /feed.js /api/feed --navigate /books/1
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use livria_common::{
    init_logging, retry_with_backoff_if, with_timeout, LivriaError, LogConfig, LogFormat,
    RetryConfig,
};
use livria_core::WorkerConfig;
use livria_net::{HttpFetcher, LoaderConfig, Request};
use livria_sw::{
    ClearCacheReply, ClientRegistry, FetchOutcome, FsCacheStorage, MemoryHost, MessageOutcome,
    OfflineWorker, SwError, WaitUntil,
};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Upper bound on draining one event's background cache writes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "livria-host")]
#[command(about = "Install the LIVRIA offline worker and replay fetch events against it")]
struct Args {
    /// Worker configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the on-disk cache generations
    #[arg(long, default_value = ".livria-cache")]
    cache_dir: PathBuf,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Origin the worker is scoped to
    #[arg(long)]
    origin: Option<Url>,

    /// Per-request network timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Send CLEAR_CACHE once every fetch event has settled
    #[arg(long)]
    clear_cache: bool,

    /// Replay a navigation request for PATH
    #[arg(long = "navigate", value_name = "PATH")]
    navigate: Vec<String>,

    /// Paths to replay as plain GET requests
    paths: Vec<String>,
}

impl Args {
    fn log_config(&self) -> LogConfig {
        let base = if self.verbose {
            LogConfig::debug()
        } else {
            LogConfig::default()
        };
        base.with_format(self.log_format)
    }

    fn worker_config(&self) -> anyhow::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::load(path)
                .map_err(|e| LivriaError::config_with_source(path.display().to_string(), e))?,
            None => WorkerConfig::default(),
        };
        if let Some(origin) = &self.origin {
            config.scope = origin.clone();
            config
                .validate()
                .map_err(|e| LivriaError::config_with_source("--origin", e))?;
        }
        Ok(config)
    }

    /// Requests to replay, plain GETs first.
    fn requests(&self) -> impl Iterator<Item = (&str, bool)> {
        self.paths
            .iter()
            .map(|path| (path.as_str(), false))
            .chain(self.navigate.iter().map(|path| (path.as_str(), true)))
    }
}

/// Map a worker failure onto the host error taxonomy.
fn host_error(e: SwError) -> LivriaError {
    match &e {
        SwError::Network(_) | SwError::PrecacheFailed { .. } => {
            LivriaError::network_with_source("worker event failed", e)
        }
        SwError::Config(_) => LivriaError::config_with_source("worker configuration", e),
        SwError::NotFound(what) => LivriaError::NotFound(what.clone()),
        _ => LivriaError::worker_with_source("worker event failed", e),
    }
}

/// Dispatch one fetch event and settle its background work.
///
/// The event is not finished until its cache writes have drained, so a
/// later event never races a write from an earlier one. Writes still
/// pending after [`DRAIN_TIMEOUT`] are aborted.
async fn dispatch_fetch(
    worker: &OfflineWorker,
    request: Request,
) -> livria_common::Result<FetchOutcome> {
    let mut wait = WaitUntil::new();
    let outcome = worker.on_fetch(request, &mut wait).await;
    match with_timeout(DRAIN_TIMEOUT, move || wait.settle()).await {
        Ok(settled) => trace!(settled, "Fetch event settled"),
        Err(e) => warn!(error = %e, "Gave up waiting for background cache writes"),
    }
    outcome.map_err(host_error)
}

/// Post CLEAR_CACHE and wait for the reply.
///
/// Returns the reply and whether the current generation existed.
async fn clear_cache(worker: &OfflineWorker) -> anyhow::Result<Option<(ClearCacheReply, bool)>> {
    let (tx, rx) = oneshot::channel();
    let message = json!({ "type": "CLEAR_CACHE" });
    match worker.on_message(&message, Some(tx)).await.map_err(host_error)? {
        MessageOutcome::CacheCleared { existed, .. } => {
            let reply = rx.await.context("CLEAR_CACHE reply dropped")?;
            Ok(Some((reply, existed)))
        }
        MessageOutcome::Ignored => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_config());

    let config = args.worker_config()?;
    let loader = LoaderConfig {
        default_timeout: Duration::from_secs(args.timeout_secs),
        ..Default::default()
    };
    let fetcher = HttpFetcher::new(loader, &config.scope)?;
    let storage = FsCacheStorage::open_dir(&args.cache_dir)
        .await
        .with_context(|| format!("cannot open cache dir {}", args.cache_dir.display()))?;

    let (host, mut events) = MemoryHost::new(config.scope.clone());
    let host = Arc::new(host);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Registration event");
        }
    });
    let clients = Arc::new(ClientRegistry::new());

    let script_url = config.resolve("/sw.js")?;
    let worker = OfflineWorker::new(
        config,
        Arc::new(fetcher),
        Arc::new(storage),
        host.clone(),
        clients.clone(),
    )?;
    info!(?worker, cache_dir = %args.cache_dir.display(), "Worker ready");

    // Install, with the host's retry policy.
    host.begin_install(script_url).await;
    let worker_ref = &worker;
    let installed = retry_with_backoff_if(
        &RetryConfig::install(),
        || async move { worker_ref.on_install().await.map_err(host_error) },
        LivriaError::is_retryable,
    )
    .await;
    let report = match installed {
        Ok(report) => {
            host.finish_install(true).await?;
            report
        }
        Err(e) => {
            host.finish_install(false).await?;
            error!(error = %e, "Install failed, worker is redundant");
            return Err(e.into());
        }
    };
    info!(cache = %report.cache_name, precached = report.precached, "Install complete");

    if host.needs_activation().await {
        let activation = worker.on_activate().await.map_err(host_error)?;
        host.finish_activate().await?;
        info!(
            deleted = activation.deleted.len(),
            failed = activation.failed.len(),
            claimed = activation.claimed,
            "Activation complete"
        );
    }

    for (path, navigate) in args.requests() {
        let url = worker
            .config()
            .resolve(path)
            .map_err(|e| LivriaError::InvalidArgument(format!("{path}: {e}")))?;
        let request = if navigate {
            Request::navigate(url.clone())
        } else {
            Request::get(url.clone())
        };

        let started = Instant::now();
        let line = match dispatch_fetch(&worker, request).await {
            Ok(FetchOutcome::Respond(response)) => json!({
                "url": url.as_str(),
                "status": response.status.as_u16(),
                "type": response.response_type.as_str(),
                "bytes": response.body.len(),
                "ms": started.elapsed().as_millis() as u64,
            }),
            Ok(FetchOutcome::Passthrough) => json!({
                "url": url.as_str(),
                "passthrough": true,
            }),
            Err(e) => {
                warn!(url = %url, error = %e, category = e.category(), "Fetch failed");
                json!({
                    "url": url.as_str(),
                    "error": e.to_string(),
                })
            }
        };
        println!("{line}");
    }

    if args.clear_cache {
        if let Some((reply, existed)) = clear_cache(&worker).await? {
            println!("{}", json!({ "clear_cache": reply.success, "existed": existed }));
        }
    }

    Ok(())
}
