//! Run orchestration: turn CLI input into queue entries and drain the queue.

pub(crate) mod config;
mod progress;

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use batch_downloader::download::constants::{CONNECT_TIMEOUT_SECS, STALL_TIMEOUT_SECS};
use batch_downloader::download::{ProxyAddr, Supervisor};
use batch_downloader::parser::{
    UrlTemplate, detect_number_mask, parse_batch_csv, parse_url_list, validate_url,
};
use batch_downloader::{
    Batch, CookieJar, DEFAULT_MAX_RETRIES, DownloadManager, Entry, Method, QueuePolicy,
    ReqwestTransport, RetryPolicy, TransportConfig, load_cookies_from_directory,
    load_cookies_from_file,
};
use tracing::{debug, error, info, warn};

use crate::cli::Args;
use config::FileConfig;

/// CLI flags merged over the file config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) output_dir: PathBuf,
    pub(crate) user_agent: Option<String>,
    pub(crate) proxy: Option<String>,
    pub(crate) cookies_dir: Option<PathBuf>,
    pub(crate) connect_timeout: Duration,
    pub(crate) stall_timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) stop_on_error: bool,
    pub(crate) stop_on_expired: bool,
}

impl Settings {
    /// CLI values win over file values, which win over built-in defaults.
    pub(crate) fn resolve(args: &Args, file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();
        Self {
            output_dir: args
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            user_agent: args.user_agent.clone().or(file.user_agent),
            proxy: args.proxy.clone().or(file.proxy),
            cookies_dir: args.cookies_dir.clone().or(file.cookies_dir),
            connect_timeout: Duration::from_secs(
                args.connect_timeout
                    .or(file.connect_timeout_secs)
                    .unwrap_or(CONNECT_TIMEOUT_SECS),
            ),
            stall_timeout: Duration::from_secs(
                args.stall_timeout
                    .or(file.stall_timeout_secs)
                    .unwrap_or(STALL_TIMEOUT_SECS),
            ),
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .map_or(DEFAULT_MAX_RETRIES, u32::from),
            stop_on_error: !args.no_stop_on_error && file.stop_on_error.unwrap_or(true),
            stop_on_expired: args.stop_on_expired || file.stop_on_expired.unwrap_or(false),
        }
    }
}

/// Downloads everything named on the command line, stdin or the batch file.
///
/// # Errors
///
/// Fails when the input cannot be read or parsed, the client cannot be built,
/// or at least one download failed.
pub(crate) async fn run(args: Args, file: Option<FileConfig>) -> Result<()> {
    let settings = Settings::resolve(&args, file.as_ref());
    debug!(?settings, "settings resolved");

    let batches = collect_batches(&args)?;
    if batches.is_empty() {
        info!("No input provided. Pass URLs as arguments, pipe them via stdin or use --batch.");
        info!("Example: batch-downloader --last 20 'https://example.com/scans/page##.jpg'");
        return Ok(());
    }

    let entries = build_entries(&batches, &settings.output_dir, args.skip_existing)?;
    if entries.is_empty() {
        info!("Nothing to download");
        return Ok(());
    }

    let jar = load_cookie_jar(&args, &settings)?;
    let proxy = settings
        .proxy
        .as_deref()
        .map(ProxyAddr::parse)
        .transpose()
        .context("Invalid --proxy value")?;
    let transport = ReqwestTransport::new(&TransportConfig {
        connect_timeout: settings.connect_timeout,
        proxy,
        cookie_jar: Some(jar),
    })
    .context("Failed to build the HTTP client")?;

    let mut policy = QueuePolicy {
        stop_on_error: settings.stop_on_error,
        stop_on_expired: settings.stop_on_expired,
        ..QueuePolicy::default()
    };
    if let Some(user_agent) = &settings.user_agent {
        policy.user_agent.clone_from(user_agent);
    }

    let (manager, events) = DownloadManager::new(Arc::new(transport), policy);
    let mut manager = manager
        .with_supervisor(Supervisor::new(settings.connect_timeout, settings.stall_timeout))
        .with_retry_policy(RetryPolicy::with_max_attempts(settings.max_retries));
    for entry in entries {
        manager.add_to_queue(entry);
    }

    let reporter = progress::spawn_reporter(events, !args.quiet && io::stderr().is_terminal());
    let stop = manager.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current chunk");
            stop.stop();
        }
    });

    manager.start().await;
    drop(manager);
    interrupt.abort();

    let summary = reporter.await.context("Progress reporter task failed")?;
    info!(
        saved = summary.saved,
        failed = summary.failed,
        warnings = summary.warnings,
        redirected = summary.redirected,
        authorization_failures = summary.authorization_failures,
        aborted = summary.aborted,
        "Download complete"
    );

    for failure in &summary.failures {
        error!("Failed: {failure}");
    }
    if summary.failed > 0 || summary.authorization_failures > 0 {
        bail!(
            "{} download(s) failed",
            summary.failed + summary.authorization_failures
        );
    }
    Ok(())
}

/// Batches from `--batch`, then from positional URLs or stdin.
fn collect_batches(args: &Args) -> Result<Vec<Batch>> {
    let mut batches = Vec::new();

    if let Some(path) = &args.batch {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file '{}'", path.display()))?;
        batches.extend(
            parse_batch_csv(&raw)
                .with_context(|| format!("Failed to parse batch file '{}'", path.display()))?,
        );
    }

    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if args.batch.is_none() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read URLs from stdin")?;
        buffer
    } else {
        String::new()
    };

    for mut batch in parse_url_list(&input_text) {
        apply_numbering(&mut batch, args);
        batches.push(batch);
    }
    debug!(batches = batches.len(), "input collected");
    Ok(batches)
}

/// Applies `--first/--last/--step/--referer/--detect` to a command-line URL.
fn apply_numbering(batch: &mut Batch, args: &Args) {
    batch.first = args.first;
    batch.last = args.last.unwrap_or(args.first);
    batch.step = args.step;
    if let Some(referer) = &args.referer {
        batch.referer = UrlTemplate::parse(referer.as_str());
    }

    if args.detect
        && !batch.url.is_masked()
        && let Some(detected) = detect_number_mask(batch.url.as_str())
    {
        info!(template = %detected.template, last = detected.last, "number mask detected");
        batch.url = UrlTemplate::parse(detected.template);
        if args.last.is_none() {
            batch.last = detected.last;
        }
    }
}

/// Expands batches into streaming entries under `output_dir`.
fn build_entries(batches: &[Batch], output_dir: &Path, skip_existing: bool) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut skipped = 0_usize;

    for batch in batches {
        let directory = match &batch.directory {
            Some(directory) => output_dir.join(directory),
            None => output_dir.to_path_buf(),
        };
        let items = batch
            .expand()
            .with_context(|| format!("Failed to expand '{}'", batch.url.as_str()))?;

        for item in items {
            let url = match validate_url(&item.url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "Skipped invalid URL");
                    skipped += 1;
                    continue;
                }
            };
            if item.filename.is_empty() {
                warn!(%url, "Skipped URL without a file name");
                skipped += 1;
                continue;
            }

            let path = directory.join(&item.filename);
            if skip_existing && path.exists() {
                debug!(path = %path.display(), "Skipped existing file");
                skipped += 1;
                continue;
            }

            let mut entry = Entry::new(url, Method::Head).with_full_path(path);
            entry.referer = item.referer;
            entries.push(entry);
        }
    }

    info!(entries = entries.len(), skipped, "Parsed input");
    Ok(entries)
}

fn load_cookie_jar(args: &Args, settings: &Settings) -> Result<CookieJar> {
    let jar = CookieJar::new();
    let filter = args.cookie_domain.as_deref();

    let loaded = if let Some(path) = &args.cookies {
        Some(load_cookies_from_file(path, filter).context("Failed to load cookies")?)
    } else if let Some(dir) = &settings.cookies_dir {
        let (path, result) =
            load_cookies_from_directory(dir, filter).context("Failed to load cookies")?;
        debug!(path = %path.display(), "cookie file selected");
        Some(result)
    } else {
        None
    };

    if let Some(result) = loaded {
        for (line, message) in &result.warnings {
            warn!(line, "cookie file: {message}");
        }
        let added = jar.add_cookies(&result.cookies);
        info!(cookies = added, "Cookies loaded");
    }
    Ok(jar)
}
