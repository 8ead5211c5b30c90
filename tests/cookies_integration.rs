//! Integration tests for cookies shared between the jar and the queue.

mod support;

use std::sync::Arc;

use batch_downloader::auth::{Cookie, CookieJar, load_cookies_from_file};
use batch_downloader::download::{
    DownloadManager, Entry, Method, QueueEvent, QueuePolicy, ReqwestTransport, TransportConfig,
};
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

fn manager_with_jar(jar: &CookieJar) -> (DownloadManager, UnboundedReceiver<QueueEvent>) {
    let transport = ReqwestTransport::new(&TransportConfig {
        cookie_jar: Some(jar.clone()),
        ..TransportConfig::default()
    })
    .expect("client should build");
    DownloadManager::new(Arc::new(transport), QueuePolicy::default())
}

#[tokio::test]
async fn test_jar_cookies_are_sent_with_requests() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/members"))
        .and(header("Cookie", "session=s3cr3t"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let jar = CookieJar::new();
    let site = Url::parse(&mock_server.uri())?;
    jar.set_cookies(&[Cookie::new("", "session", "s3cr3t")], &site);

    let (mut manager, mut events) = manager_with_jar(&jar);
    manager
        .download(Entry::new(format!("{}/members", mock_server.uri()), Method::Get))
        .await;

    let mut body = None;
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::DownloadSucceeded { data, .. } = event {
            body = Some(data);
        }
    }
    assert_eq!(body.as_deref(), Some(&b"welcome"[..]));
    Ok(())
}

#[tokio::test]
async fn test_server_cookies_land_in_shared_jar() -> Result<(), Box<dyn std::error::Error>> {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "token=abc123; Path=/")
                .set_body_string("ok"),
        )
        .mount(&mock_server)
        .await;

    let jar = CookieJar::new();
    let (mut manager, _events) = manager_with_jar(&jar);
    manager
        .download(Entry::new(format!("{}/login", mock_server.uri()), Method::Get))
        .await;

    let site = Url::parse(&format!("{}/gallery", mock_server.uri()))?;
    assert_eq!(
        jar.get_cookies(&site),
        vec![("token".to_string(), "abc123".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_cookie_file_filtered_by_domain() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let file = temp_dir.path().join("cookies.txt");
    std::fs::write(
        &file,
        "# Netscape HTTP Cookie File\n\
.example.com\tTRUE\t/\tFALSE\t0\tsid\tone\n\
.other.org\tTRUE\t/\tFALSE\t0\tsid\ttwo\n\
broken line\n",
    )?;

    let result = load_cookies_from_file(&file, Some("example"))?;
    assert_eq!(result.cookies.len(), 1);
    assert_eq!(result.cookies[0].value(), "one");
    assert_eq!(result.warnings.len(), 1);

    let jar = CookieJar::new();
    assert_eq!(jar.add_cookies(&result.cookies), 1);
    let url = Url::parse("http://www.example.com/page")?;
    assert_eq!(
        jar.get_cookies(&url),
        vec![("sid".to_string(), "one".to_string())]
    );
    Ok(())
}
