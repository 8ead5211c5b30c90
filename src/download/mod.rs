//! Sequential, resumable HTTP download queue.
//!
//! Entries are drained one request at a time. Files streamed to disk are
//! probed with `HEAD` first so partial files can be resumed with byte ranges;
//! every other entry is fetched into memory and handed to the consumer
//! through [`QueueEvent::DownloadSucceeded`].
//!
//! # Features
//!
//! - Resume negotiation with `Accept-Ranges` / `Content-Range`
//! - Connection and stall timeouts with bounded retries
//! - Redirects followed for GET and HEAD, reported for POST
//! - Pagination through offset/count parameters
//! - Free-space check before streaming a body
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use batch_downloader::download::{
//!     DownloadManager, Entry, Method, QueueEvent, QueuePolicy, ReqwestTransport, TransportConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReqwestTransport::new(&TransportConfig::default())?;
//! let (mut manager, mut events) = DownloadManager::new(Arc::new(transport), QueuePolicy::default());
//!
//! let entry = Entry::new("https://example.com/file.iso", Method::Head)
//!     .with_full_path("./downloads/file.iso");
//! manager.download(entry).await;
//!
//! while let Ok(event) = events.try_recv() {
//!     if let QueueEvent::DownloadSaved { entry } = event {
//!         println!("Saved {}", entry.filename);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod entry;
mod error;
mod events;
mod manager;
mod negotiator;
mod progress;
mod request;
mod retry;
mod sink;
mod supervisor;
mod transport;

pub use entry::{Entry, EntryPhase, Method};
pub use error::DownloadError;
pub use events::QueueEvent;
pub use manager::{DownloadManager, QueuePolicy, StopHandle};
pub use negotiator::{
    Attachment, ContentRange, parse_content_disposition, parse_content_range, resolve_redirect,
};
pub use progress::ProgressSample;
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use sink::{FileSink, SaveOutcome, save_file};
pub use supervisor::Supervisor;
pub use transport::{
    BodyStream, ProxyAddr, ReqwestTransport, Transport, TransportConfig, TransportError,
    TransportRequest, TransportResponse,
};
