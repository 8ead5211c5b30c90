//! Notifications emitted by the queue manager.
//!
//! Every event carries an immutable snapshot of the entry it concerns; the
//! queue stays the only owner of the live entry.

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use super::entry::Entry;

/// Queue and per-entry notifications, in emission order.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Draining began with `total` entries.
    QueueStarted { total: usize },
    /// `current` of `total` entries have been dealt with.
    QueueProgress { current: usize, total: usize },
    /// Draining stopped; `aborted` is true when [`stop`](crate::download::StopHandle::stop) was requested.
    QueueFinished { aborted: bool },
    /// An entry was added to the queue.
    DownloadQueued { url: String },
    /// A request is about to be issued for the entry.
    DownloadStarted { entry: Entry },
    /// Bytes received for the current entry.
    DownloadProgress {
        current: u64,
        total: u64,
        speed_kib: f64,
        entry: Entry,
    },
    /// The response body is complete. Empty for bodies streamed to disk.
    DownloadSucceeded { data: Bytes, entry: Entry },
    /// The destination file is complete on disk.
    DownloadSaved { entry: Entry },
    /// A POST was answered with a redirect, which is never followed.
    DownloadRedirected { target: String, entry: Entry },
    /// Informational message about the entry.
    DownloadInfo { message: String, entry: Entry },
    /// Something unexpected that did not stop the entry.
    DownloadWarning { message: String, entry: Entry },
    /// The entry was dropped because of an error.
    DownloadFailed { message: String, entry: Entry },
    /// 401/403: the site wants a CAPTCHA or an account verification.
    AuthorizationFailed { url: String, body: Bytes },
}

/// Sends events, ignoring a consumer that went away.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: UnboundedSender<QueueEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<QueueEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub(crate) fn info(&self, message: impl Into<String>, entry: &Entry) {
        self.emit(QueueEvent::DownloadInfo {
            message: message.into(),
            entry: entry.clone(),
        });
    }

    pub(crate) fn warning(&self, message: impl Into<String>, entry: &Entry) {
        self.emit(QueueEvent::DownloadWarning {
            message: message.into(),
            entry: entry.clone(),
        });
    }

    pub(crate) fn failed(&self, message: impl Into<String>, entry: &Entry) {
        self.emit(QueueEvent::DownloadFailed {
            message: message.into(),
            entry: entry.clone(),
        });
    }
}
