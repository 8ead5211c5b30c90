//! Batch Downloader Core Library
//!
//! Downloads long lists of files over HTTP, one request at a time, resuming
//! partial files whenever the server allows it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Queue manager, resume negotiation, timeouts and the file sink
//! - [`parser`] - URL lists, `#` number masks, CSV batch files and file names
//! - [`auth`] - Netscape `cookies.txt` loading and the shared cookie jar

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod download;
pub mod parser;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use auth::{Cookie, CookieError, CookieJar, load_cookies_from_directory, load_cookies_from_file};
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadError, DownloadManager, Entry, EntryPhase, FailureType, Method,
    QueueEvent, QueuePolicy, ReqwestTransport, RetryDecision, RetryPolicy, StopHandle, Supervisor,
    Transport, TransportConfig, classify_error,
};
pub use parser::{Batch, BatchItem, ParseError, parse_batch_csv, parse_url_list};
