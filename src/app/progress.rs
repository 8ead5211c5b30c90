//! Progress bars and logging driven by queue events.

use batch_downloader::QueueEvent;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const QUEUE_TEMPLATE: &str = "{prefix:>9} [{bar:40.cyan/blue}] {pos}/{len}";
const BYTES_TEMPLATE: &str =
    "{prefix:>9} [{bar:40.green/white}] {bytes}/{total_bytes} {bytes_per_sec} {wide_msg}";

/// What happened during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) saved: usize,
    pub(crate) failed: usize,
    /// `url: reason` for every failed download, in order.
    pub(crate) failures: Vec<String>,
    pub(crate) warnings: usize,
    pub(crate) redirected: usize,
    pub(crate) authorization_failures: usize,
    pub(crate) aborted: bool,
}

/// Consumes queue events until the manager is dropped.
///
/// Bars are drawn only when `show_bars` is set; logging happens either way.
pub(crate) fn spawn_reporter(
    mut events: UnboundedReceiver<QueueEvent>,
    show_bars: bool,
) -> JoinHandle<RunSummary> {
    tokio::spawn(async move {
        let mut reporter = Reporter::new(show_bars);
        while let Some(event) = events.recv().await {
            reporter.handle(event);
        }
        reporter.finish()
    })
}

struct Reporter {
    queue_bar: ProgressBar,
    file_bar: ProgressBar,
    summary: RunSummary,
}

impl Reporter {
    fn new(show_bars: bool) -> Self {
        let multi = if show_bars {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let queue_bar = multi.add(ProgressBar::new(0));
        queue_bar.set_style(
            ProgressStyle::with_template(QUEUE_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        queue_bar.set_prefix("queue");

        let file_bar = multi.add(ProgressBar::new(0));
        file_bar.set_style(
            ProgressStyle::with_template(BYTES_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        file_bar.set_prefix("file");

        Self {
            queue_bar,
            file_bar,
            summary: RunSummary::default(),
        }
    }

    fn handle(&mut self, event: QueueEvent) {
        match event {
            QueueEvent::QueueStarted { total } => {
                self.queue_bar.set_length(as_u64(total));
                self.queue_bar.set_position(0);
                info!(total, "queue started");
            }
            QueueEvent::QueueProgress { current, total } => {
                self.queue_bar.set_length(as_u64(total));
                self.queue_bar.set_position(as_u64(current));
            }
            QueueEvent::QueueFinished { aborted } => {
                self.summary.aborted = aborted;
                if aborted {
                    warn!("queue aborted");
                } else {
                    debug!("queue finished");
                }
            }
            QueueEvent::DownloadQueued { url } => trace!(%url, "queued"),
            QueueEvent::DownloadStarted { entry } => {
                self.file_bar.reset();
                self.file_bar.set_length(entry.filesize);
                self.file_bar.set_message(entry.filename.clone());
                debug!(url = %entry.url, file = %entry.filename, "download started");
            }
            QueueEvent::DownloadProgress { current, total, .. } => {
                if total > 0 {
                    self.file_bar.set_length(total);
                }
                self.file_bar.set_position(current);
            }
            QueueEvent::DownloadSucceeded { data, entry } => {
                debug!(url = %entry.url, bytes = data.len(), "download succeeded");
            }
            QueueEvent::DownloadSaved { entry } => {
                self.summary.saved += 1;
                let path = entry
                    .full_path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default();
                info!(url = %entry.url, %path, "saved");
            }
            QueueEvent::DownloadRedirected { target, entry } => {
                self.summary.redirected += 1;
                info!(url = %entry.url, %target, "redirected");
            }
            QueueEvent::DownloadInfo { message, entry } => info!(url = %entry.url, "{message}"),
            QueueEvent::DownloadWarning { message, entry } => {
                self.summary.warnings += 1;
                warn!(url = %entry.url, "{message}");
            }
            QueueEvent::DownloadFailed { message, entry } => {
                let reason = entry.last_error().unwrap_or(message.as_str());
                warn!(url = %entry.url, "download failed: {reason}");
                self.summary.failed += 1;
                self.summary.failures.push(format!("{}: {reason}", entry.url));
            }
            QueueEvent::AuthorizationFailed { url, body } => {
                self.summary.authorization_failures += 1;
                warn!(
                    %url,
                    bytes = body.len(),
                    "authorization required: open the URL in a browser to solve the CAPTCHA or verify the account"
                );
            }
        }
    }

    fn finish(self) -> RunSummary {
        self.file_bar.finish_and_clear();
        self.queue_bar.finish_and_clear();
        self.summary
    }
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_downloader::{Entry, Method};
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn entry() -> Entry {
        Entry::new("http://x/a.jpg", Method::Get).with_full_path("/tmp/a.jpg")
    }

    #[test]
    fn test_reporter_counts_outcomes() {
        let mut reporter = Reporter::new(false);
        reporter.handle(QueueEvent::QueueStarted { total: 3 });
        reporter.handle(QueueEvent::DownloadStarted { entry: entry() });
        reporter.handle(QueueEvent::DownloadProgress {
            current: 10,
            total: 100,
            speed_kib: 1.0,
            entry: entry(),
        });
        assert_eq!(reporter.file_bar.length(), Some(100));
        assert_eq!(reporter.file_bar.position(), 10);

        reporter.handle(QueueEvent::DownloadSaved { entry: entry() });
        reporter.handle(QueueEvent::DownloadFailed {
            message: "boom".into(),
            entry: entry(),
        });
        reporter.handle(QueueEvent::AuthorizationFailed {
            url: "http://x/".into(),
            body: Bytes::from_static(b"captcha"),
        });
        reporter.handle(QueueEvent::QueueProgress { current: 3, total: 3 });
        assert_eq!(reporter.queue_bar.position(), 3);

        let summary = reporter.finish();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures, vec!["http://x/a.jpg: boom".to_string()]);
        assert_eq!(summary.authorization_failures, 1);
        assert!(!summary.aborted);
    }

    #[test]
    fn test_spawn_reporter_returns_summary_when_channel_closes() {
        let summary = tokio_test::block_on(async {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = spawn_reporter(rx, false);
            tx.send(QueueEvent::DownloadRedirected {
                target: "http://x/b".into(),
                entry: entry(),
            })
            .unwrap();
            tx.send(QueueEvent::QueueFinished { aborted: true }).unwrap();
            drop(tx);
            handle.await.unwrap()
        });
        assert_eq!(summary.redirected, 1);
        assert!(summary.aborted);
    }
}
