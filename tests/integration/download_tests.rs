//! Integration tests for the download engine
//!
//! These tests use wiremock to serve files and check retries, renames,
//! transparent decompression and the batch concurrency bound.

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sumi_mirror::download::{
    part_path, BatchOptions, DownloadError, DownloadOptions, DownloadResult, DownloadTarget,
    Downloader, FileRequest, Progress, RenameEvent, RetryNotice,
};
use sumi_mirror::storage::ImageRef;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader() -> Downloader {
    Downloader::with_user_agent("TestMirror/1.0").expect("Failed to build client")
}

fn fast_options() -> DownloadOptions {
    DownloadOptions {
        request_timeout: Duration::from_secs(5),
        backoff_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

/// Reads one request head from a raw connection
async fn read_request(stream: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
}

/// Serves the given raw HTTP replies, one connection each, in order
///
/// Each connection is closed right after its reply, so a reply shorter than
/// its `Content-Length` drops the connection in the middle of the body.
async fn serve_raw(replies: Vec<&'static [u8]>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            read_request(&mut stream).await;
            let _ = stream.write_all(reply).await;
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{}", address), connections)
}

#[tokio::test]
async fn test_download_writes_file_without_part() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/data.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("hello mirror", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("nested/data.txt");

    let result = downloader()
        .download(
            &format!("{}/files/data.txt", server.uri()),
            &local,
            &fast_options(),
        )
        .await
        .unwrap();

    assert_eq!(result.final_path, local);
    assert_eq!(result.byte_size, 12);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "hello mirror");
    assert!(!part_path(&local).exists());
}

#[tokio::test]
async fn test_retry_ceiling_on_timeouts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("late", "text/plain")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let retries = Arc::new(AtomicUsize::new(0));
    let seen = retries.clone();

    let mut options = fast_options();
    options.request_timeout = Duration::from_millis(200);
    options.max_attempts = 3;
    options.backoff_delay = Duration::from_millis(100);
    options.callbacks.on_download_timeout = Some(Arc::new(move |_: &RetryNotice<'_>| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("slow.txt");

    let start = Instant::now();
    let result = downloader()
        .download(&format!("{}/slow.txt", server.uri()), &local, &options)
        .await;

    assert!(matches!(
        result,
        Err(DownloadError::TimeoutExhausted { attempts: 3, .. })
    ));
    assert_eq!(result.unwrap_err().code().as_deref(), Some("ETIMEDOUT"));
    assert_eq!(requests_to(&server, "/slow.txt").await, 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    // Three timed out attempts and two backoff delays
    assert!(start.elapsed() >= Duration::from_millis(800));
    assert!(!local.exists());
    assert!(!part_path(&local).exists());
}

#[tokio::test]
async fn test_not_found_fails_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = fast_options();
    options.backoff_delay = Duration::from_secs(10);

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("missing.png");

    let start = Instant::now();
    let result = downloader()
        .download(&format!("{}/missing.png", server.uri()), &local, &options)
        .await;

    assert!(matches!(result, Err(DownloadError::NotFound { .. })));
    assert_eq!(result.unwrap_err().code().as_deref(), Some("404"));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!local.exists());
    assert!(!part_path(&local).exists());
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = downloader()
        .download(
            &format!("{}/broken", server.uri()),
            dir.path().join("broken"),
            &fast_options(),
        )
        .await;

    assert!(matches!(
        result,
        Err(DownloadError::Http { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"hello gzip").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/greeting.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(compressed, "text/plain")
                .insert_header("content-encoding", "gzip"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("greeting.txt");

    let result = downloader()
        .download(&format!("{}/greeting.txt", server.uri()), &local, &fast_options())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&result.final_path).unwrap(), "hello gzip");
}

#[tokio::test]
async fn test_deflate_body_is_decoded() {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"hello deflate").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/greeting.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(compressed, "text/plain")
                .insert_header("content-encoding", "deflate"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("greeting.txt");

    let result = downloader()
        .download(&format!("{}/greeting.txt", server.uri()), &local, &fast_options())
        .await
        .unwrap();

    assert_eq!(result.byte_size, 13);
    assert_eq!(std::fs::read_to_string(&result.final_path).unwrap(), "hello deflate");
}

#[tokio::test]
async fn test_progress_reports_percentage_of_content_length() {
    let body = vec![7u8; 256 * 1024];
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "application/octet-stream"))
        .mount(&server)
        .await;

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let mut options = fast_options();
    options.no_rename = true;
    options.callbacks.on_progress = Some(Arc::new(move |p: &Progress<'_>| {
        sink.lock().unwrap().push((p.current, p.total, p.percentage));
    }));

    let dir = TempDir::new().unwrap();
    downloader()
        .download(&format!("{}/big.bin", server.uri()), dir.path().join("big.bin"), &options)
        .await
        .unwrap();

    let reports = reports.lock().unwrap();
    let size = body.len() as u64;
    assert!(!reports.is_empty());
    assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(reports.iter().all(|(_, total, _)| *total == size));
    assert_eq!(reports.last().copied(), Some((size, size, 100.0)));
}

#[tokio::test]
async fn test_progress_without_content_length_reports_zero_percent() {
    let (base, _) = serve_raw(vec![
        &b"HTTP/1.1 200 OK\r\n\
Content-Type: application/octet-stream\r\n\
Transfer-Encoding: chunked\r\n\
Connection: close\r\n\r\n\
5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n"[..],
    ])
    .await;

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let mut options = fast_options();
    options.no_rename = true;
    options.callbacks.on_progress = Some(Arc::new(move |p: &Progress<'_>| {
        sink.lock().unwrap().push((p.current, p.total, p.percentage));
    }));

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("stream.bin");
    downloader()
        .download(&format!("{}/stream.bin", base), &local, &options)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&local).unwrap(), "helloworld");
    let reports = reports.lock().unwrap();
    assert!(!reports.is_empty());
    assert!(reports.iter().all(|(_, total, pct)| *total == 0 && *pct == 0.0));
    assert_eq!(reports.last().map(|r| r.0), Some(10));
}

#[tokio::test]
async fn test_dropped_connection_is_retried_without_leftover_part() {
    let (base, connections) = serve_raw(vec![
        &b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 100\r\n\
Connection: close\r\n\r\n\
partial"[..],
        &b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 8\r\n\
Connection: close\r\n\r\n\
complete"[..],
    ])
    .await;

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("data.txt");

    let retried = Arc::new(AtomicUsize::new(0));
    let part_left = Arc::new(AtomicBool::new(false));
    let (seen, leftover, part) = (retried.clone(), part_left.clone(), part_path(&local));
    let mut options = fast_options();
    options.callbacks.on_download_timeout = Some(Arc::new(move |notice: &RetryNotice<'_>| {
        assert_eq!(notice.error.code().as_deref(), Some("ECONNRESET"));
        seen.fetch_add(1, Ordering::SeqCst);
        if part.exists() {
            leftover.store(true, Ordering::SeqCst);
        }
    }));

    let result = downloader()
        .download(&format!("{}/data.txt", base), &local, &options)
        .await
        .unwrap();

    assert_eq!(connections.load(Ordering::SeqCst), 2);
    assert_eq!(retried.load(Ordering::SeqCst), 1);
    assert!(!part_left.load(Ordering::SeqCst));
    assert_eq!(result.byte_size, 8);
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "complete");
    assert!(!part_path(&local).exists());
}

#[tokio::test]
async fn test_rename_to_content_type_extension() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photo"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"))
        .mount(&server)
        .await;

    let renamed = Arc::new(AtomicUsize::new(0));
    let seen = renamed.clone();
    let mut options = fast_options();
    options.callbacks.on_rename = Some(Arc::new(move |event: &RenameEvent<'_>| {
        assert!(event.new_file.ends_with("photo.png"));
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("photo");

    let result = downloader()
        .download(&format!("{}/photo", server.uri()), &local, &options)
        .await
        .unwrap();

    assert_eq!(result.final_path, dir.path().join("photo.png"));
    assert_eq!(result.content_type.as_deref(), Some("image/png"));
    assert!(result.final_path.is_file());
    assert!(!local.exists());
    assert_eq!(renamed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_rename_keeps_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photo"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1, 2, 3], "image/png"))
        .mount(&server)
        .await;

    let mut options = fast_options();
    options.no_rename = true;
    options.return_headers = true;

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("photo");

    let result = downloader()
        .download(&format!("{}/photo", server.uri()), &local, &options)
        .await
        .unwrap();

    assert_eq!(result.final_path, local);
    assert!(result.headers.is_some());
}

#[tokio::test]
async fn test_skip_if_exist_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("new", "text/plain"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("kept.txt");
    std::fs::write(&local, "old").unwrap();

    let mut options = fast_options();
    options.skip_if_exist = true;

    let result = downloader()
        .download(&format!("{}/kept.txt", server.uri()), &local, &options)
        .await
        .unwrap();

    assert!(result.skipped);
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "old");
}

#[tokio::test]
async fn test_batch_respects_thread_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(vec![0u8; 16], "application/octet-stream")
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut download = fast_options();
    {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        download.callbacks.on_download_start = Some(Arc::new(move |_: &DownloadTarget<'_>| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
        }));
    }
    {
        let in_flight = in_flight.clone();
        download.callbacks.on_download_finished = Some(Arc::new(move |_: &DownloadResult| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    let dir = TempDir::new().unwrap();
    let mut files: Vec<FileRequest> = (0..10)
        .map(|i| FileRequest::new(format!("{}/files/f{}.bin", server.uri(), i)))
        .collect();

    let options = BatchOptions {
        output_dir: Some(dir.path().to_path_buf()),
        max_download_threads: 3,
        download,
    };
    downloader().download_files(&mut files, &options).await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 10);
    for file in &files {
        assert!(!file.error, "{} failed", file.url);
        let final_path = file.final_path.as_ref().unwrap();
        assert!(final_path.is_file());
        assert!(final_path.starts_with(dir.path().join("127.0.0.1").join("files")));
    }
}

#[tokio::test]
async fn test_batch_records_failures_on_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1, 2, 3], "image/png"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut images = vec![
        ImageRef::new(format!("{}/ok.png", server.uri()), "ok.png"),
        ImageRef::new(format!("{}/gone.png", server.uri()), "gone.png"),
    ];

    let options = BatchOptions {
        output_dir: Some(dir.path().to_path_buf()),
        max_download_threads: 2,
        download: fast_options(),
    };
    downloader().download_images(&mut images, &options).await.unwrap();

    assert!(!images[0].is_failed());
    assert!(Path::new(&dir.path().join("ok.png")).is_file());
    assert!(images[1].is_failed());
    assert_eq!(images[1].error_code.as_deref(), Some("404"));
    assert!(!dir.path().join("gone.png").exists());
}

#[tokio::test]
async fn test_download_page_rejects_non_html() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><title>Hi</title></html>", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let downloader = downloader();
    let result = downloader
        .download_page(&format!("{}/data.json", server.uri()), &fast_options())
        .await;
    assert!(matches!(result, Err(DownloadError::NotHtml { .. })));

    let page = downloader
        .download_page(&format!("{}/page", server.uri()), &fast_options())
        .await
        .unwrap();
    assert_eq!(page.resolved_url, format!("{}/page", server.uri()));
    assert!(page.html.contains("<title>Hi</title>"));
}
