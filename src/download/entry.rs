//! Queue entry: one download task and its resume/negotiation state.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::debug;

use super::error::DownloadError;
use super::sink::FileSink;
use super::transport::TransportResponse;

/// HTTP method an entry is (currently) issued with.
///
/// Streaming entries start as [`Method::Head`] and flip to [`Method::Get`]
/// once the probe has settled how the body will be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// Not set; the entry is dropped when it reaches the front of the queue.
    #[default]
    None,
    Get,
    Head,
    Post,
}

impl Method {
    /// Returns the HTTP token for this method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entry stands in the probe / download sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryPhase {
    /// Plain HEAD to learn size, date and range support.
    #[default]
    Probing,
    /// HEAD carrying `Range: bytes={fileoffset}-` to confirm partial content.
    RangingHead,
    /// GET or POST for the body.
    Downloading,
    /// Completed successfully.
    Done,
    /// Dropped after an error.
    Failed,
}

/// One queued download task.
///
/// Equality only looks at the request identity (`url`, `method`,
/// `parameters`, `offset`, `count`); headers and resume state never take part.
/// Cloning copies everything except the open file and the in-flight reply,
/// which always start unset in the copy.
#[derive(Default)]
pub struct Entry {
    /// Target URL.
    pub url: String,
    /// Sent as `Referer` when not empty.
    pub referer: String,
    /// Request method.
    pub method: Method,
    /// Extra request headers, keys compared case-sensitively.
    pub headers: BTreeMap<String, String>,
    /// Query parameters (GET/HEAD) or form fields (POST).
    pub parameters: BTreeMap<String, String>,
    /// Raw POST body, sent instead of `parameters` when a `Content-Type` header is set.
    pub data: Bytes,
    /// Parameter name carrying `offset` for paginated requests.
    pub offset_parameter: String,
    /// Parameter name carrying `count` for paginated requests.
    pub count_parameter: String,
    /// Current page.
    pub offset: u32,
    /// Number of pages; zero disables pagination.
    pub count: u32,
    /// Caller-defined tag, carried through events untouched.
    pub kind: i32,

    /// Bytes already present on disk.
    pub fileoffset: u64,
    /// Total size announced by the server, zero when unknown.
    pub filesize: u64,
    /// Server answered `Accept-Ranges: bytes`.
    pub supports_accept_ranges: bool,
    /// Server answered a ranged request with a parseable `Content-Range`.
    pub supports_content_range: bool,
    /// Server `Last-Modified`.
    pub time: Option<SystemTime>,

    /// Display name, replaced by the `Content-Disposition` attachment name.
    pub filename: String,
    /// Destination on disk.
    pub full_path: Option<PathBuf>,

    pub(crate) phase: EntryPhase,
    pub(crate) streaming: bool,
    pub(crate) redirects: u32,
    pub(crate) attempts: u32,
    pub(crate) started: Option<Instant>,
    pub(crate) error: Option<String>,

    file: Option<FileSink>,
    reply: Option<TransportResponse>,
}

impl Entry {
    /// Creates an entry for `url` issued with `method`.
    #[must_use]
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            ..Self::default()
        }
    }

    /// Sets the destination path and derives the display name from it when empty.
    #[must_use]
    pub fn with_full_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if self.filename.is_empty()
            && let Some(name) = path.file_name()
        {
            self.filename = name.to_string_lossy().into_owned();
        }
        self.full_path = Some(path);
        self
    }

    /// Returns the negotiation phase.
    #[must_use]
    pub fn phase(&self) -> EntryPhase {
        self.phase
    }

    /// Returns the last error reported for this entry, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the body is streamed to `full_path` rather than buffered.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether the server supports resuming this entry.
    #[must_use]
    pub fn supports_resume(&self) -> bool {
        self.supports_accept_ranges && self.supports_content_range
    }

    /// Whether a destination file is currently open.
    #[must_use]
    pub fn has_open_file(&self) -> bool {
        self.file.is_some()
    }

    /// Resets every field to its default, closing the file and the reply.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clears everything learned from the server about the body.
    pub(crate) fn reset_resume_state(&mut self) {
        self.supports_accept_ranges = false;
        self.supports_content_range = false;
        self.fileoffset = 0;
        self.filesize = 0;
        self.time = None;
    }

    /// Opens `full_path` for writing the body.
    ///
    /// Any previously open file is closed first. The file is appended to when
    /// `fileoffset > 0` and truncated otherwise. Parent directories are created
    /// and the volume must hold the `filesize - fileoffset` remaining bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NoDestination`] without a path,
    /// [`DownloadError::InsufficientDiskSpace`] when the volume is too small, or
    /// [`DownloadError::Io`] when the file cannot be opened.
    pub async fn open_file(&mut self) -> Result<(), DownloadError> {
        self.close_file().await?;

        let path = self
            .full_path
            .clone()
            .ok_or_else(|| DownloadError::no_destination(&self.url))?;
        let required = self.filesize.saturating_sub(self.fileoffset);
        let sink = FileSink::open(&path, self.fileoffset > 0, required).await?;
        self.file = Some(sink);
        Ok(())
    }

    /// Flushes and closes the destination file. No-op when nothing is open.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the final flush fails.
    pub async fn close_file(&mut self) -> Result<(), DownloadError> {
        if let Some(sink) = self.file.take() {
            sink.close().await?;
        }
        Ok(())
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut FileSink> {
        self.file.as_mut()
    }

    pub(crate) fn set_reply(&mut self, reply: TransportResponse) {
        self.reply = Some(reply);
    }

    pub(crate) fn reply_mut(&mut self) -> Option<&mut TransportResponse> {
        self.reply.as_mut()
    }

    /// Drops the in-flight reply, which aborts the underlying connection.
    pub(crate) fn abort_reply(&mut self) {
        if self.reply.take().is_some() {
            debug!(url = %self.url, "aborted in-flight reply");
        }
    }

    /// Size of the destination file on disk, zero when missing.
    #[must_use]
    pub fn size_on_disk(&self) -> u64 {
        self.full_path
            .as_ref()
            .and_then(|path| std::fs::metadata(path).ok())
            .filter(std::fs::Metadata::is_file)
            .map_or(0, |meta| meta.len())
    }

    /// Whether the destination already holds the complete body.
    ///
    /// True only when the file exists, is not empty, has exactly `filesize`
    /// bytes and its modification time equals `time` to the second. Never
    /// mutates the entry.
    #[must_use]
    pub fn check_downloaded_file(&self) -> bool {
        let Some(path) = self.full_path.as_ref() else {
            return false;
        };
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let size = meta.len();
        if size == 0 || size != self.filesize {
            return false;
        }
        let Some(expected) = self.time.and_then(unix_secs) else {
            return false;
        };
        meta.modified().ok().and_then(unix_secs) == Some(expected)
    }

    /// Returns the follow-up page for a paginated entry, if any remain.
    pub(crate) fn next_page(&self) -> Option<Self> {
        if self.count == 0 || self.offset >= self.count {
            return None;
        }
        let mut next = self.clone();
        next.offset += 1;
        next.phase = EntryPhase::Probing;
        next.redirects = 0;
        next.attempts = 0;
        next.started = None;
        next.error = None;
        Some(next)
    }
}

fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.method == other.method
            && self.parameters == other.parameters
            && self.offset == other.offset
            && self.count == other.count
    }
}

impl Eq for Entry {}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            referer: self.referer.clone(),
            method: self.method,
            headers: self.headers.clone(),
            parameters: self.parameters.clone(),
            data: self.data.clone(),
            offset_parameter: self.offset_parameter.clone(),
            count_parameter: self.count_parameter.clone(),
            offset: self.offset,
            count: self.count,
            kind: self.kind,
            fileoffset: self.fileoffset,
            filesize: self.filesize,
            supports_accept_ranges: self.supports_accept_ranges,
            supports_content_range: self.supports_content_range,
            time: self.time,
            filename: self.filename.clone(),
            full_path: self.full_path.clone(),
            phase: self.phase,
            streaming: self.streaming,
            redirects: self.redirects,
            attempts: self.attempts,
            started: self.started,
            error: self.error.clone(),
            file: None,
            reply: None,
        }
    }
}

// Header values and the POST body may hold credentials; only their shape is printed.
impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("referer", &self.referer)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("parameters", &self.parameters)
            .field("data_len", &self.data.len())
            .field("offset", &self.offset)
            .field("count", &self.count)
            .field("fileoffset", &self.fileoffset)
            .field("filesize", &self.filesize)
            .field("supports_accept_ranges", &self.supports_accept_ranges)
            .field("supports_content_range", &self.supports_content_range)
            .field("filename", &self.filename)
            .field("full_path", &self.full_path)
            .field("phase", &self.phase)
            .field("file_open", &self.file.is_some())
            .field("reply_open", &self.reply.is_some())
            .finish_non_exhaustive()
    }
}
