//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download numbered batches of files over HTTP, resuming partial files.
///
/// A run of `#` in a URL is a number mask: `page###.jpg` with `--last 12`
/// fetches `page001.jpg` to `page012.jpg`.
#[derive(Parser, Debug)]
#[command(name = "batch-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// URLs or URL templates to download (read from stdin when omitted)
    pub urls: Vec<String>,

    /// Directory the files are written to [default: .]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// CSV batch file with url,referer,directory,first,last,step columns
    #[arg(short, long, value_name = "FILE")]
    pub batch: Option<PathBuf>,

    /// First number substituted for the `#` mask
    #[arg(long, default_value_t = 1)]
    pub first: u32,

    /// Last number substituted for the `#` mask, inclusive [default: --first]
    #[arg(long)]
    pub last: Option<u32>,

    /// Increment between two numbers
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub step: u32,

    /// Turn the longest number of each plain URL into a `#` mask
    #[arg(long)]
    pub detect: bool,

    /// Referer sent with every request, may carry the same `#` mask
    #[arg(long)]
    pub referer: Option<String>,

    /// User-Agent header value
    #[arg(long)]
    pub user_agent: Option<String>,

    /// HTTP proxy as host:port
    #[arg(long, value_name = "HOST:PORT")]
    pub proxy: Option<String>,

    /// Netscape cookies.txt file to load
    #[arg(long, value_name = "FILE", conflicts_with = "cookies_dir")]
    pub cookies: Option<PathBuf>,

    /// Directory holding exported cookie files; the newest one is loaded
    #[arg(long, value_name = "DIR")]
    pub cookies_dir: Option<PathBuf>,

    /// Only load cookies whose domain contains this text
    #[arg(long, value_name = "DOMAIN")]
    pub cookie_domain: Option<String>,

    /// Keep draining the queue after a download fails
    #[arg(long)]
    pub no_stop_on_error: bool,

    /// Stop the queue on the first timeout instead of retrying
    #[arg(long)]
    pub stop_on_expired: bool,

    /// Seconds to wait for response headers (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Seconds without data before a download is considered stalled (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub stall_timeout: Option<u64>,

    /// Maximum attempts for transient failures (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Skip files already present in the output directory
    #[arg(long)]
    pub skip_existing: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
