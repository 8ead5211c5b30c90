//! Integration tests for the download queue.
//!
//! These tests drive the queue against wiremock servers that answer HEAD and
//! GET the way real file servers do, with or without byte-range support.

mod support;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use batch_downloader::download::{
    DownloadManager, Entry, Method, QueueEvent, QueuePolicy, ReqwestTransport, RetryPolicy,
    Supervisor, TransportConfig,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const CONTENT: &[u8] = b"abcdefghij";
const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

/// Serves `content` for HEAD and GET, optionally honoring `Range`.
struct FileResponder {
    content: Vec<u8>,
    head: bool,
    advertise_ranges: bool,
    honor_ranges: bool,
}

impl FileResponder {
    fn new(head: bool, advertise_ranges: bool, honor_ranges: bool) -> Self {
        Self {
            content: CONTENT.to_vec(),
            head,
            advertise_ranges,
            honor_ranges,
        }
    }

    fn requested_range(request: &Request) -> Option<(usize, Option<usize>)> {
        let value = request.headers.get("Range")?.to_str().ok()?;
        let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
        let start = start.parse().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        };
        Some((start, end))
    }
}

impl Respond for FileResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.content.len();
        let mut template = match Self::requested_range(request) {
            Some((start, end)) if self.honor_ranges && start < total => {
                let end = end.unwrap_or(total - 1).min(total - 1);
                let body = &self.content[start..=end];
                let template = ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/{total}"));
                if self.head {
                    template.insert_header("Content-Length", body.len().to_string())
                } else {
                    template.set_body_bytes(body.to_vec())
                }
            }
            _ => {
                let template = ResponseTemplate::new(200);
                if self.head {
                    template.insert_header("Content-Length", total.to_string())
                } else {
                    template.set_body_bytes(self.content.clone())
                }
            }
        };
        template = template.insert_header("Last-Modified", LAST_MODIFIED);
        if self.advertise_ranges {
            template = template.insert_header("Accept-Ranges", "bytes");
        }
        template
    }
}

async fn mount_file(server: &MockServer, file_path: &str, advertise: bool, honor: bool) {
    Mock::given(method("HEAD"))
        .and(path(file_path))
        .respond_with(FileResponder::new(true, advertise, honor))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(FileResponder::new(false, advertise, honor))
        .mount(server)
        .await;
}

fn manager_with(policy: QueuePolicy) -> (DownloadManager, UnboundedReceiver<QueueEvent>) {
    let transport =
        ReqwestTransport::new(&TransportConfig::default()).expect("client should build");
    let (manager, events) = DownloadManager::new(Arc::new(transport), policy);
    (manager.with_retry_policy(RetryPolicy::immediate(2)), events)
}

fn manager() -> (DownloadManager, UnboundedReceiver<QueueEvent>) {
    manager_with(QueuePolicy::default())
}

fn drain(events: &mut UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn streaming_entry(server: &MockServer, file_path: &str, dir: &Path) -> Entry {
    let name = file_path.trim_start_matches('/');
    Entry::new(format!("{}{file_path}", server.uri()), Method::Head).with_full_path(dir.join(name))
}

fn saved_count(events: &[QueueEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, QueueEvent::DownloadSaved { .. }))
        .count()
}

fn failures(events: &[QueueEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::DownloadFailed { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn warnings(events: &[QueueEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::DownloadWarning { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn finished_aborted(events: &[QueueEvent]) -> Option<bool> {
    events.iter().rev().find_map(|e| match e {
        QueueEvent::QueueFinished { aborted } => Some(*aborted),
        _ => None,
    })
}

/// (method, Range header) of every request the server saw for `file_path`.
async fn requests_for(server: &MockServer, file_path: &str) -> Vec<(String, Option<String>)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == file_path)
        .map(|r| {
            let range = r
                .headers
                .get("Range")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            (r.method.to_string(), range)
        })
        .collect()
}

#[tokio::test]
async fn test_fresh_download_probes_then_fetches_whole_file() -> Result<(), Box<dyn std::error::Error>>
{
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    mount_file(&mock_server, "/file.bin", true, true).await;
    let temp_dir = TempDir::new()?;

    let (mut manager, mut events) = manager();
    let entry = streaming_entry(&mock_server, "/file.bin", temp_dir.path());
    assert!(manager.download(entry).await);

    let target = temp_dir.path().join("file.bin");
    assert_eq!(std::fs::read(&target)?, CONTENT);

    let modified = std::fs::metadata(&target)?.modified()?;
    let expected = httpdate::parse_http_date(LAST_MODIFIED)?;
    assert_eq!(
        modified.duration_since(UNIX_EPOCH)?.as_secs(),
        expected.duration_since(UNIX_EPOCH)?.as_secs(),
        "mtime should follow Last-Modified"
    );

    let requests = requests_for(&mock_server, "/file.bin").await;
    assert_eq!(
        requests,
        vec![("HEAD".to_string(), None), ("GET".to_string(), None)]
    );

    let events = drain(&mut events);
    assert_eq!(saved_count(&events), 1);
    assert!(failures(&events).is_empty());
    assert_eq!(finished_aborted(&events), Some(false));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, QueueEvent::DownloadProgress { current: 10, total: 10, .. })),
        "final progress should report the whole file"
    );
    Ok(())
}

#[tokio::test]
async fn test_partial_file_is_resumed_with_byte_ranges() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    mount_file(&mock_server, "/resume.bin", true, true).await;
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("resume.bin"), &CONTENT[..3])?;

    let (mut manager, mut events) = manager();
    manager
        .download(streaming_entry(&mock_server, "/resume.bin", temp_dir.path()))
        .await;

    assert_eq!(std::fs::read(temp_dir.path().join("resume.bin"))?, CONTENT);
    let requests = requests_for(&mock_server, "/resume.bin").await;
    assert_eq!(
        requests,
        vec![
            ("HEAD".to_string(), None),
            ("HEAD".to_string(), Some("bytes=3-".to_string())),
            ("GET".to_string(), Some("bytes=3-9".to_string())),
        ]
    );

    let events = drain(&mut events);
    assert_eq!(saved_count(&events), 1);
    assert!(failures(&events).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_server_without_ranges_restarts_from_zero() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    mount_file(&mock_server, "/plain.bin", false, false).await;
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("plain.bin"), b"XYZ")?;

    let (mut manager, mut events) = manager();
    manager
        .download(streaming_entry(&mock_server, "/plain.bin", temp_dir.path()))
        .await;

    assert_eq!(
        std::fs::read(temp_dir.path().join("plain.bin"))?,
        CONTENT,
        "stale partial bytes must be overwritten"
    );
    let requests = requests_for(&mock_server, "/plain.bin").await;
    assert_eq!(
        requests,
        vec![("HEAD".to_string(), None), ("GET".to_string(), None)]
    );
    assert_eq!(saved_count(&drain(&mut events)), 1);
    Ok(())
}

#[tokio::test]
async fn test_advertised_but_ignored_ranges_restart_download() -> Result<(), Box<dyn std::error::Error>>
{
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    mount_file(&mock_server, "/liar.bin", true, false).await;
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("liar.bin"), b"XYZ")?;

    let (mut manager, mut events) = manager();
    manager
        .download(streaming_entry(&mock_server, "/liar.bin", temp_dir.path()))
        .await;

    assert_eq!(std::fs::read(temp_dir.path().join("liar.bin"))?, CONTENT);
    let requests = requests_for(&mock_server, "/liar.bin").await;
    assert_eq!(
        requests,
        vec![
            ("HEAD".to_string(), None),
            ("HEAD".to_string(), Some("bytes=3-".to_string())),
            ("GET".to_string(), None),
        ]
    );

    let events = drain(&mut events);
    assert!(
        warnings(&events)
            .iter()
            .any(|w| w.contains("ignored the range request")),
        "restart should be reported"
    );
    assert_eq!(saved_count(&events), 1);
    Ok(())
}

#[tokio::test]
async fn test_complete_file_is_not_downloaded_again() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    mount_file(&mock_server, "/done.bin", true, true).await;
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("done.bin"), CONTENT)?;

    let (mut manager, mut events) = manager();
    manager
        .download(streaming_entry(&mock_server, "/done.bin", temp_dir.path()))
        .await;

    let requests = requests_for(&mock_server, "/done.bin").await;
    assert_eq!(requests, vec![("HEAD".to_string(), None)]);
    assert_eq!(saved_count(&drain(&mut events)), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_file_stops_queue_by_default() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    mount_file(&mock_server, "/next.bin", true, true).await;
    let temp_dir = TempDir::new()?;

    let (mut manager, mut events) = manager();
    manager.add_to_queue(streaming_entry(&mock_server, "/missing.bin", temp_dir.path()));
    manager.add_to_queue(streaming_entry(&mock_server, "/next.bin", temp_dir.path()));
    manager.start().await;

    let events = drain(&mut events);
    let failures = failures(&events);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("404"), "unexpected message: {}", failures[0]);
    assert_eq!(finished_aborted(&events), Some(true));
    assert!(requests_for(&mock_server, "/next.bin").await.is_empty());
    assert!(manager.is_empty(), "abort releases every entry");
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_skipped_without_stop_on_error() -> Result<(), Box<dyn std::error::Error>>
{
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    mount_file(&mock_server, "/next.bin", true, true).await;
    let temp_dir = TempDir::new()?;

    let (mut manager, mut events) = manager_with(QueuePolicy {
        stop_on_error: false,
        ..QueuePolicy::default()
    });
    manager.add_to_queue(streaming_entry(&mock_server, "/missing.bin", temp_dir.path()));
    manager.add_to_queue(streaming_entry(&mock_server, "/next.bin", temp_dir.path()));
    manager.start().await;

    let events = drain(&mut events);
    assert_eq!(failures(&events).len(), 1);
    assert_eq!(saved_count(&events), 1);
    assert_eq!(finished_aborted(&events), Some(false));
    assert_eq!(std::fs::read(temp_dir.path().join("next.bin"))?, CONTENT);
    Ok(())
}

#[tokio::test]
async fn test_timeout_stops_queue_with_stop_on_expired() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/slow.bin"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new()?;

    let (manager, mut events) = manager_with(QueuePolicy {
        stop_on_error: false,
        stop_on_expired: true,
        ..QueuePolicy::default()
    });
    let mut manager = manager.with_supervisor(Supervisor::new(
        Duration::from_millis(200),
        Duration::from_millis(200),
    ));
    manager.add_to_queue(streaming_entry(&mock_server, "/slow.bin", temp_dir.path()));
    manager.add_to_queue(streaming_entry(&mock_server, "/later.bin", temp_dir.path()));
    manager.start().await;

    let events = drain(&mut events);
    assert_eq!(failures(&events).len(), 1);
    assert_eq!(finished_aborted(&events), Some(true));
    assert!(requests_for(&mock_server, "/later.bin").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_redirect_is_followed_with_referer() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/old.bin"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new.bin"))
        .mount(&mock_server)
        .await;
    mount_file(&mock_server, "/new.bin", true, true).await;
    let temp_dir = TempDir::new()?;

    let (mut manager, mut events) = manager();
    let entry = streaming_entry(&mock_server, "/old.bin", temp_dir.path());
    let old_url = entry.url.clone();
    manager.download(entry).await;

    assert_eq!(std::fs::read(temp_dir.path().join("old.bin"))?, CONTENT);
    let gets: Vec<Request> = mock_server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/new.bin" && r.method.as_str() == "GET")
        .collect();
    assert_eq!(gets.len(), 1);
    assert_eq!(
        gets[0].headers.get("Referer").and_then(|v| v.to_str().ok()),
        Some(old_url.as_str())
    );
    assert_eq!(saved_count(&drain(&mut events)), 1);
    Ok(())
}

#[tokio::test]
async fn test_self_redirect_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("HEAD"))
        .and(path("/loop.bin"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop.bin"))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new()?;

    let (mut manager, mut events) = manager();
    manager
        .download(streaming_entry(&mock_server, "/loop.bin", temp_dir.path()))
        .await;

    assert_eq!(requests_for(&mock_server, "/loop.bin").await.len(), 1);
    let events = drain(&mut events);
    assert!(
        warnings(&events)
            .iter()
            .any(|w| w.contains("redirects to itself"))
    );
    assert!(failures(&events).is_empty());
    assert_eq!(finished_aborted(&events), Some(false));
    Ok(())
}

#[tokio::test]
async fn test_forbidden_reports_authorization_failure_with_body() -> Result<(), Box<dyn std::error::Error>>
{
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(ResponseTemplate::new(403).set_body_string("<html>captcha</html>"))
        .mount(&mock_server)
        .await;

    let (mut manager, mut events) = manager();
    let url = format!("{}/gallery", mock_server.uri());
    manager.download(Entry::new(url.clone(), Method::Get)).await;

    let events = drain(&mut events);
    let auth: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::AuthorizationFailed { url, body } => Some((url.clone(), body.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0].0, url);
    assert_eq!(&auth[0].1[..], b"<html>captcha</html>");
    assert!(failures(&events).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_post_redirect_is_reported_not_followed() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string("user=me"))
        .and(header(
            "Content-Type",
            "application/x-www-form-urlencoded; charset=UTF-8",
        ))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", "/welcome"))
        .mount(&mock_server)
        .await;

    let (mut manager, mut events) = manager();
    let mut entry = Entry::new(format!("{}/login", mock_server.uri()), Method::Post);
    entry.parameters.insert("user".into(), "me".into());
    manager.download(entry).await;

    let events = drain(&mut events);
    let targets: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::DownloadRedirected { target, .. } => Some(target.as_str()),
            _ => None,
        })
        .collect();
    let expected = format!("{}/welcome", mock_server.uri());
    assert_eq!(targets, vec![expected.as_str()]);
    assert!(requests_for(&mock_server, "/welcome").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_paginated_entry_queues_following_pages() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("items"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (mut manager, mut events) = manager();
    let mut entry = Entry::new(format!("{}/list", mock_server.uri()), Method::Get);
    entry.offset_parameter = "page".into();
    entry.offset = 1;
    entry.count = 3;
    manager.download(entry).await;

    let pages: Vec<String> = mock_server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    assert_eq!(pages, vec!["1", "2", "3"]);

    let succeeded = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, QueueEvent::DownloadSucceeded { .. }))
        .count();
    assert_eq!(succeeded, 3);
    Ok(())
}

#[tokio::test]
async fn test_buffered_gzip_body_is_saved_inflated() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"<html>index</html>")?;
    let compressed = encoder.finish()?;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(compressed),
        )
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new()?;

    let (mut manager, mut events) = manager();
    let entry = Entry::new(format!("{}/index.html", mock_server.uri()), Method::Get)
        .with_full_path(temp_dir.path().join("index.html"));
    manager.download(entry).await;

    assert_eq!(
        std::fs::read(temp_dir.path().join("index.html"))?,
        b"<html>index</html>"
    );
    let events = drain(&mut events);
    let data = events.iter().find_map(|e| match e {
        QueueEvent::DownloadSucceeded { data, .. } => Some(data.clone()),
        _ => None,
    });
    assert_eq!(data.as_deref(), Some(&b"<html>index</html>"[..]));
    assert_eq!(saved_count(&events), 1);
    Ok(())
}
