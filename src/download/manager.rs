//! Queue manager: drains entries one request at a time.
//!
//! The manager owns the FIFO of [`Entry`] values. Each turn takes the front
//! entry, lets the negotiator plan one request, issues it through the
//! [`Transport`] under the [`Supervisor`] timeouts, and then either drops the
//! entry (done, failed, redirected POST) or puts it back at the front to be
//! issued again (probe result, redirect, transient failure). Consumers follow
//! along through [`QueueEvent`]s.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, HeaderMap, LOCATION};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::MAX_REDIRECTS;
use super::entry::{Entry, EntryPhase, Method};
use super::error::DownloadError;
use super::events::{EventSink, QueueEvent};
use super::negotiator::{self, BodyOutcome, HeadOutcome, Plan};
use super::progress::ProgressTracker;
use super::request::{build_request, parse_entry_url};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::sink::{SaveOutcome, inflate_gzip, looks_gzipped, save_file, set_modified};
use super::supervisor::Supervisor;
use super::transport::{Transport, header_str};
use crate::user_agent;

/// Queue-wide settings, read on every completion.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// Stop draining after any per-entry failure.
    pub stop_on_error: bool,
    /// Treat timeouts and network errors as failures instead of retrying.
    pub stop_on_expired: bool,
    /// `User-Agent` sent with every request; empty sends none.
    pub user_agent: String,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            stop_on_error: true,
            stop_on_expired: false,
            user_agent: user_agent::default_user_agent(),
        }
    }
}

/// Cloneable handle that asks a running queue to stop.
///
/// The in-flight request is abandoned at the next chunk or completion, and the
/// queue then finishes with `aborted = true`.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Requests a stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What happens to the entry after one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// Put it back at the front and issue it again.
    Again,
    /// Drop it and move on.
    Done,
}

/// Sequential download queue.
pub struct DownloadManager {
    transport: Arc<dyn Transport>,
    queue: VecDeque<Entry>,
    policy: QueuePolicy,
    supervisor: Supervisor,
    retry: RetryPolicy,
    stop: StopHandle,
    events: EventSink,
    initial_size: usize,
    last_progress: Option<usize>,
}

impl DownloadManager {
    /// Creates an idle manager and the receiving end of its event channel.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: QueuePolicy,
    ) -> (Self, UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = unbounded_channel();
        let manager = Self {
            transport,
            queue: VecDeque::new(),
            policy,
            supervisor: Supervisor::default(),
            retry: RetryPolicy::default(),
            stop: StopHandle::default(),
            events: EventSink::new(tx),
            initial_size: 0,
            last_progress: None,
        };
        (manager, rx)
    }

    /// Replaces the connection and stall timeouts.
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Replaces the retry budget for transient failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle for stopping the queue from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Requests a stop.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Appends `entry` unless an equal one is already queued.
    ///
    /// Entries queued with [`Method::Head`] and a destination path stream their
    /// body to disk and resume partial files; all others are buffered.
    pub fn add_to_queue(&mut self, mut entry: Entry) -> bool {
        if self.queue.contains(&entry) {
            debug!(url = %entry.url, "duplicate entry ignored");
            return false;
        }
        entry.streaming = entry.method == Method::Head && entry.full_path.is_some();
        entry.phase = if entry.method == Method::Head {
            EntryPhase::Probing
        } else {
            EntryPhase::Downloading
        };
        debug!(url = %entry.url, method = %entry.method, streaming = entry.streaming, "entry queued");
        self.events.emit(QueueEvent::DownloadQueued {
            url: entry.url.clone(),
        });
        self.queue.push_back(entry);
        true
    }

    /// Queues `entry` and drains the queue. A duplicate is rejected without
    /// starting anything.
    pub async fn download(&mut self, entry: Entry) -> bool {
        if !self.add_to_queue(entry) {
            return false;
        }
        self.start().await;
        true
    }

    /// Removes the first queued entry for `url`.
    pub fn remove_from_queue(&mut self, url: &str) -> Option<Entry> {
        let index = self.queue.iter().position(|entry| entry.url == url)?;
        self.queue.remove(index)
    }

    /// Drops all entries, releasing their files and replies.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.initial_size = 0;
        self.last_progress = None;
    }

    /// Drains the queue until it is empty or a stop is requested.
    #[instrument(skip(self), fields(queued = self.queue.len()))]
    pub async fn start(&mut self) {
        self.initial_size = self.queue.len();
        self.last_progress = None;
        info!(total = self.initial_size, "queue started");
        self.events.emit(QueueEvent::QueueStarted {
            total: self.initial_size,
        });

        loop {
            if self.stop.is_stopped() {
                self.abort().await;
                return;
            }
            let Some(mut entry) = self.queue.pop_front() else {
                self.report_progress(self.initial_size);
                info!("queue finished");
                self.events
                    .emit(QueueEvent::QueueFinished { aborted: false });
                return;
            };

            let remaining = self.queue.len() + 1;
            self.report_progress(self.initial_size.saturating_sub(remaining));

            match self.advance(&mut entry).await {
                Turn::Again => self.queue.push_front(entry),
                Turn::Done => release(entry).await,
            }
        }
    }

    async fn abort(&mut self) {
        info!(remaining = self.queue.len(), "queue aborted");
        while let Some(entry) = self.queue.pop_front() {
            release(entry).await;
        }
        self.reset();
        self.stop.clear();
        self.events.emit(QueueEvent::QueueFinished { aborted: true });
    }

    fn report_progress(&mut self, current: usize) {
        if self.last_progress == Some(current) {
            return;
        }
        self.last_progress = Some(current);
        self.events.emit(QueueEvent::QueueProgress {
            current,
            total: self.initial_size,
        });
    }

    /// Issues one request for `entry` and handles its response.
    #[instrument(skip_all, fields(url = %entry.url, method = %entry.method))]
    async fn advance(&mut self, entry: &mut Entry) -> Turn {
        if entry.method == Method::None {
            self.events.warning("No request method set, skipping", entry);
            return Turn::Done;
        }
        if let Err(error) = parse_entry_url(&entry.url) {
            return self.fail(entry, error).await;
        }
        if entry.started.is_none() {
            entry.started = Some(Instant::now());
            self.events.emit(QueueEvent::DownloadStarted {
                entry: entry.clone(),
            });
        }

        let range = match negotiator::plan_request(entry) {
            Plan::Send { range } => range,
            Plan::VerifyExisting => return self.verify_existing(entry),
        };

        if entry.is_streaming()
            && entry.method == Method::Get
            && let Err(error) = entry.open_file().await
        {
            return self.fail(entry, error).await;
        }

        let request = match build_request(entry, &self.policy.user_agent, range.as_deref()) {
            Ok(request) => request,
            Err(error) => return self.fail(entry, error).await,
        };
        debug!(range = ?range, "issuing request");

        let response = match self.supervisor.send(self.transport.as_ref(), request).await {
            Ok(response) => response,
            Err(error) => return self.fail(entry, error).await,
        };
        if self.stop.is_stopped() {
            return self.interrupt(entry).await;
        }

        let status = response.status;
        let headers = response.headers.clone();
        entry.set_reply(response);

        let turn = match entry.method {
            Method::Head => self.on_head(entry, status, &headers).await,
            Method::Get | Method::Post => {
                self.on_body(entry, status, &headers, range.is_some())
                    .await
            }
            Method::None => Turn::Done,
        };
        entry.abort_reply();
        turn
    }

    async fn on_head(&mut self, entry: &mut Entry, status: StatusCode, headers: &HeaderMap) -> Turn {
        let mut notes = Vec::new();
        let outcome = negotiator::on_head_response(entry, status, headers, &mut notes);
        self.emit_notes(notes, entry);

        match outcome {
            HeadOutcome::Reissue => Turn::Again,
            HeadOutcome::AlreadySaved => {
                if let (Some(path), Some(time)) = (entry.full_path.as_deref(), entry.time)
                    && let Err(error) = set_modified(path, time)
                {
                    warn!(error = %error, "unable to set modification time");
                }
                entry.fileoffset = entry.filesize;
                entry.phase = EntryPhase::Done;
                info!(url = %entry.url, "file already complete");
                self.events.emit(QueueEvent::DownloadSaved {
                    entry: entry.clone(),
                });
                Turn::Done
            }
            HeadOutcome::Oversized { on_disk, expected } => {
                entry.phase = EntryPhase::Failed;
                self.events.warning(
                    format!(
                        "File {} is larger than the remote one ({on_disk} / {expected} bytes), skipping",
                        display_path(entry)
                    ),
                    entry,
                );
                Turn::Done
            }
            HeadOutcome::Redirect => self.redirect(entry, headers).await,
            HeadOutcome::ProxyAuthentication => self.proxy_authentication(entry).await,
            HeadOutcome::Unexpected(code) => {
                let error = DownloadError::unexpected_status(&entry.url, code);
                self.fail(entry, error).await
            }
        }
    }

    async fn on_body(
        &mut self,
        entry: &mut Entry,
        status: StatusCode,
        headers: &HeaderMap,
        range_requested: bool,
    ) -> Turn {
        let mut notes = Vec::new();
        let outcome =
            negotiator::on_body_response(entry, status, headers, range_requested, &mut notes);
        self.emit_notes(notes, entry);

        match outcome {
            BodyOutcome::Read { restart, expected } => {
                let gzip = header_str(headers, CONTENT_ENCODING)
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
                self.read_body(entry, restart, expected, gzip).await
            }
            BodyOutcome::Redirect => self.redirect(entry, headers).await,
            BodyOutcome::AuthorizationFailed => {
                let body = self.drain_body(entry).await;
                if let Err(error) = entry.close_file().await {
                    warn!(error = %error, "failed to close destination file");
                }
                entry.phase = EntryPhase::Failed;
                warn!(url = %entry.url, status = status.as_u16(), "authorization required");
                self.events.emit(QueueEvent::AuthorizationFailed {
                    url: entry.url.clone(),
                    body,
                });
                Turn::Done
            }
            BodyOutcome::ProxyAuthentication => self.proxy_authentication(entry).await,
            BodyOutcome::Unexpected(code) => {
                let error = DownloadError::unexpected_status(&entry.url, code);
                self.fail(entry, error).await
            }
        }
    }

    async fn read_body(
        &mut self,
        entry: &mut Entry,
        restart: bool,
        expected: Option<u64>,
        gzip: bool,
    ) -> Turn {
        let streaming = entry.is_streaming() && entry.method == Method::Get;
        if streaming
            && restart
            && let Some(sink) = entry.file_mut()
            && let Err(error) = sink.truncate().await
        {
            return self.fail(entry, error).await;
        }

        let url = entry.url.clone();
        let supervisor = self.supervisor;
        let base = if streaming { entry.fileoffset } else { 0 };
        let mut tracker = ProgressTracker::new(base, expected);
        let mut buffer = Vec::new();

        loop {
            if self.stop.is_stopped() {
                return self.interrupt(entry).await;
            }
            let Some(reply) = entry.reply_mut() else {
                break;
            };
            let chunk = match supervisor.next_chunk(&mut reply.body, &url).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(error) => return self.fail(entry, error).await,
            };

            if streaming {
                if let Some(sink) = entry.file_mut()
                    && let Err(error) = sink.write(&chunk).await
                {
                    return self.fail(entry, error).await;
                }
            } else {
                buffer.extend_from_slice(&chunk);
            }

            if let Some(sample) = tracker.record(chunk.len()) {
                self.events.emit(QueueEvent::DownloadProgress {
                    current: sample.current,
                    total: sample.total,
                    speed_kib: sample.speed_kib,
                    entry: entry.clone(),
                });
            }
        }
        entry.abort_reply();
        debug!(received = tracker.received(), "body complete");

        if streaming {
            self.finish_streaming(entry).await
        } else {
            self.finish_buffered(entry, buffer, gzip).await
        }
    }

    async fn finish_streaming(&mut self, entry: &mut Entry) -> Turn {
        if let Err(error) = entry.close_file().await {
            return self.fail(entry, error).await;
        }
        let Some(path) = entry.full_path.clone() else {
            let error = DownloadError::no_destination(&entry.url);
            return self.fail(entry, error).await;
        };

        let on_disk = entry.size_on_disk();
        if entry.filesize > 0 && on_disk != entry.filesize {
            let error = DownloadError::size_mismatch(&path, on_disk, entry.filesize);
            return self.fail(entry, error).await;
        }
        if let Some(time) = entry.time
            && let Err(error) = set_modified(&path, time)
        {
            warn!(error = %error, "unable to set modification time");
        }

        entry.fileoffset = on_disk;
        entry.phase = EntryPhase::Done;
        info!(url = %entry.url, path = %path.display(), bytes = on_disk, "download saved");
        self.events.emit(QueueEvent::DownloadSaved {
            entry: entry.clone(),
        });
        self.events.emit(QueueEvent::DownloadSucceeded {
            data: Bytes::new(),
            entry: entry.clone(),
        });
        Turn::Done
    }

    async fn finish_buffered(&mut self, entry: &mut Entry, buffer: Vec<u8>, gzip: bool) -> Turn {
        let mut data = Bytes::from(buffer);
        if gzip && looks_gzipped(&data) {
            match inflate_gzip(&data) {
                Ok(inflated) => data = Bytes::from(inflated),
                Err(source) => {
                    let error = DownloadError::decode(&entry.url, source);
                    return self.fail(entry, error).await;
                }
            }
        }

        if entry.method != Method::Post
            && let Some(path) = entry.full_path.clone()
        {
            match save_file(&path, &data, entry.time).await {
                Ok(SaveOutcome::Written) => {
                    info!(url = %entry.url, path = %path.display(), "download saved");
                    self.events.emit(QueueEvent::DownloadSaved {
                        entry: entry.clone(),
                    });
                }
                Ok(SaveOutcome::AlreadyExists) => {
                    self.events.info(
                        format!("File {} already exists, not overwritten", path.display()),
                        entry,
                    );
                    self.events.emit(QueueEvent::DownloadSaved {
                        entry: entry.clone(),
                    });
                }
                Ok(SaveOutcome::Empty) => {}
                Err(error) => return self.fail(entry, error).await,
            }
        }

        entry.phase = EntryPhase::Done;
        self.events.emit(QueueEvent::DownloadSucceeded {
            data: data.clone(),
            entry: entry.clone(),
        });

        if !data.is_empty()
            && let Some(next) = entry.next_page()
        {
            debug!(offset = next.offset, count = next.count, "queueing next page");
            self.add_to_queue(next);
        }
        Turn::Done
    }

    fn verify_existing(&mut self, entry: &mut Entry) -> Turn {
        if entry.check_downloaded_file() {
            entry.phase = EntryPhase::Done;
            info!(url = %entry.url, "file already complete");
            self.events.emit(QueueEvent::DownloadSaved {
                entry: entry.clone(),
            });
        } else {
            entry.phase = EntryPhase::Failed;
            self.events.warning(
                format!(
                    "File {} already has {} bytes but does not match the remote file ({} bytes), skipping",
                    display_path(entry),
                    entry.fileoffset,
                    entry.filesize
                ),
                entry,
            );
        }
        Turn::Done
    }

    async fn redirect(&mut self, entry: &mut Entry, headers: &HeaderMap) -> Turn {
        let location = header_str(headers, LOCATION).unwrap_or_default().to_string();
        let target = Url::parse(&entry.url)
            .ok()
            .and_then(|current| negotiator::resolve_redirect(&current, &location));

        if entry.method == Method::Post {
            let target = target.map_or(location, |url| url.to_string());
            info!(url = %entry.url, target = %target, "POST redirected, not following");
            self.events.emit(QueueEvent::DownloadRedirected {
                target,
                entry: entry.clone(),
            });
            entry.phase = EntryPhase::Done;
            return Turn::Done;
        }

        if let Err(error) = entry.close_file().await {
            warn!(error = %error, "failed to close destination file");
        }
        let Some(target) = target else {
            entry.phase = EntryPhase::Failed;
            self.events.warning(
                format!("Unable to follow redirection to '{location}'"),
                entry,
            );
            return Turn::Done;
        };
        if target.as_str() == entry.url {
            entry.phase = EntryPhase::Failed;
            self.events
                .warning(format!("{} redirects to itself", entry.url), entry);
            return Turn::Done;
        }
        if entry.redirects >= MAX_REDIRECTS {
            let error = DownloadError::too_many_redirects(&entry.url, MAX_REDIRECTS);
            return self.fail(entry, error).await;
        }

        debug!(from = %entry.url, to = %target, "following redirect");
        self.events
            .info(format!("Redirected to {target}"), entry);
        negotiator::follow_redirect(entry, &target);
        Turn::Again
    }

    async fn proxy_authentication(&mut self, entry: &mut Entry) -> Turn {
        if let Err(error) = entry.close_file().await {
            warn!(error = %error, "failed to close destination file");
        }
        entry.phase = EntryPhase::Failed;
        self.events
            .warning("Proxy authentication required", entry);
        Turn::Done
    }

    /// Reads what is left of the body, for error pages.
    async fn drain_body(&self, entry: &mut Entry) -> Bytes {
        let url = entry.url.clone();
        let mut body = Vec::new();
        while let Some(reply) = entry.reply_mut() {
            match self.supervisor.next_chunk(&mut reply.body, &url).await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(error) => {
                    debug!(error = %error, "error page truncated");
                    break;
                }
            }
        }
        Bytes::from(body)
    }

    /// Leaves the entry at the front after a stop request; the queue loop aborts.
    async fn interrupt(&mut self, entry: &mut Entry) -> Turn {
        debug!(url = %entry.url, "stop requested, abandoning request");
        entry.abort_reply();
        if let Err(error) = entry.close_file().await {
            warn!(error = %error, "failed to close destination file");
        }
        Turn::Again
    }

    /// Routes a failure: transient ones are retried, the rest drop the entry.
    async fn fail(&mut self, entry: &mut Entry, error: DownloadError) -> Turn {
        entry.abort_reply();
        if let Err(close_error) = entry.close_file().await {
            warn!(error = %close_error, "failed to close destination file");
        }

        match classify_error(&error) {
            FailureType::Transient if !self.policy.stop_on_expired => {
                entry.attempts += 1;
                match self.retry.should_retry(FailureType::Transient, entry.attempts) {
                    RetryDecision::Retry { delay, attempt } => {
                        self.events
                            .warning(format!("{error}, retrying (attempt {attempt})"), entry);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        entry.fileoffset = if entry.supports_resume() {
                            entry.size_on_disk()
                        } else {
                            0
                        };
                        Turn::Again
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        self.process_error(entry, format!("{error} ({reason})"));
                        Turn::Done
                    }
                }
            }
            FailureType::QueueFatal => {
                entry.phase = EntryPhase::Failed;
                entry.error = Some(error.to_string());
                warn!(url = %entry.url, error = %error, "stopping queue");
                self.events.failed(error.to_string(), entry);
                self.stop.stop();
                Turn::Done
            }
            FailureType::Transient | FailureType::Permanent => {
                self.process_error(entry, error.to_string());
                Turn::Done
            }
        }
    }

    fn process_error(&mut self, entry: &mut Entry, message: String) {
        warn!(url = %entry.url, error = %message, "download failed");
        entry.phase = EntryPhase::Failed;
        entry.error = Some(message.clone());
        self.events.failed(message, entry);
        if self.policy.stop_on_error || self.policy.stop_on_expired {
            self.stop.stop();
        }
    }

    fn emit_notes(&self, notes: Vec<String>, entry: &Entry) {
        for note in notes {
            debug!(url = %entry.url, note = %note, "negotiation note");
            self.events.warning(note, entry);
        }
    }
}

fn display_path(entry: &Entry) -> String {
    entry
        .full_path
        .as_ref()
        .map_or_else(|| entry.filename.clone(), |path| path.display().to_string())
}

async fn release(mut entry: Entry) {
    entry.abort_reply();
    if let Err(error) = entry.close_file().await {
        warn!(url = %entry.url, error = %error, "failed to close destination file");
    }
}
