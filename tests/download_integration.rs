//! Integration tests for the download manager with mock HTTP servers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mirador_core::download::PART_SUFFIX;
use mirador_core::{Client, DownloadItem, DownloadManager, DownloadStatus, ItemError};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager_for(server: &MockServer, max_concurrent: usize) -> Arc<DownloadManager> {
    let base = format!("{}/files/", server.uri());
    let client = Client::new(&base, 100.0).expect("client should build");
    Arc::new(DownloadManager::new(client, max_concurrent))
}

async fn wait_terminal(item: &Arc<DownloadItem>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !item.status().is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("download did not reach a terminal state in time");
}

fn part_of(dest: &Path) -> std::path::PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(PART_SUFFIX);
    std::path::PathBuf::from(os)
}

#[tokio::test]
async fn test_download_full_flow_preserves_content() {
    let content = b"complete file body, all thirty-nine bytes";
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let dest = dir.path().join("game.zip");
    let manager = manager_for(&server, 2);

    let url = format!("{}/files/game.zip", server.uri());
    let (item, created) = manager
        .enqueue("game.zip", &url, dest.clone())
        .expect("enqueue");
    assert!(created);

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Completed);
    assert_eq!(item.done_bytes(), content.len() as u64);

    let written = std::fs::read(&dest).expect("file should exist");
    assert_eq!(written, content);
    assert!(!part_of(&dest).exists(), "part file must be renamed away");
}

#[tokio::test]
async fn test_resume_appends_to_partial_file() {
    let full = b"0123456789abcdef";
    let prefix = &full[..6];
    let rest = &full[6..];

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .and(header("Range", "bytes=6-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(rest.to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let dest = dir.path().join("game.zip");
    std::fs::write(part_of(&dest), prefix).expect("seed part file");

    let manager = manager_for(&server, 1);
    let url = format!("{}/files/game.zip", server.uri());
    let (item, _) = manager
        .enqueue("game.zip", &url, dest.clone())
        .expect("enqueue");

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Completed);
    assert_eq!(item.done_bytes(), full.len() as u64);
    assert_eq!(item.total_bytes(), full.len() as u64);

    let written = std::fs::read(&dest).expect("file should exist");
    assert_eq!(written, full);
    server.verify().await;
}

#[tokio::test]
async fn test_ignored_range_restarts_from_scratch() {
    let full = b"fresh full body";
    let server = MockServer::start().await;
    // Server answers 200 with the whole file even though a range was asked.
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(full.to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let dest = dir.path().join("game.zip");
    std::fs::write(part_of(&dest), b"stale partial data").expect("seed part file");

    let manager = manager_for(&server, 1);
    let url = format!("{}/files/game.zip", server.uri());
    let (item, _) = manager
        .enqueue("game.zip", &url, dest.clone())
        .expect("enqueue");

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Completed);

    let written = std::fs::read(&dest).expect("file should exist");
    assert_eq!(written, full, "stale partial data must be discarded");
}

#[tokio::test]
async fn test_existing_destination_skips_transfer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let dest = dir.path().join("game.zip");
    std::fs::write(&dest, b"already here").expect("seed destination");

    let manager = manager_for(&server, 1);
    let url = format!("{}/files/game.zip", server.uri());
    let (item, _) = manager
        .enqueue("game.zip", &url, dest.clone())
        .expect("enqueue");

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Completed);
    assert_eq!(item.done_bytes(), 12);
    server.verify().await;
}

#[tokio::test]
async fn test_html_error_page_fails_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                "<html><body>Download quota exceeded</body></html>",
                "text/html; charset=utf-8",
            ),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let dest = dir.path().join("game.zip");
    let manager = manager_for(&server, 1);
    let url = format!("{}/files/game.zip", server.uri());
    let (item, _) = manager
        .enqueue("game.zip", &url, dest.clone())
        .expect("enqueue");

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Failed);
    assert!(matches!(item.error(), Some(ItemError::Other(_))));
    assert!(!dest.exists(), "no file may be written from an error page");
}

#[tokio::test]
async fn test_server_error_then_retry_succeeds() {
    let content = b"second time lucky";
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let dest = dir.path().join("game.zip");
    let manager = manager_for(&server, 1);
    let url = format!("{}/files/game.zip", server.uri());
    let (item, _) = manager
        .enqueue("game.zip", &url, dest.clone())
        .expect("enqueue");

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Failed);

    assert!(manager.retry(item.id));
    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Completed);
    assert_eq!(std::fs::read(&dest).expect("file"), content);
}

#[tokio::test]
async fn test_concurrency_respects_slot_limit() {
    let server = MockServer::start().await;
    for name in ["a.zip", "b.zip", "c.zip"] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{name}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"x".to_vec())
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().expect("temp dir");
    let manager = manager_for(&server, 1);
    let mut items = Vec::new();
    for name in ["a.zip", "b.zip", "c.zip"] {
        let url = format!("{}/files/{name}", server.uri());
        let (item, _) = manager
            .enqueue(name, &url, dir.path().join(name))
            .expect("enqueue");
        items.push(item);
    }

    // With one slot there is never more than one active transfer.
    for _ in 0..20 {
        assert!(manager.active_count() <= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for item in &items {
        wait_terminal(item).await;
        assert_eq!(item.status(), DownloadStatus::Completed);
    }
}

#[tokio::test]
async fn test_cancelled_download_reports_cancelled_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/game.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let manager = manager_for(&server, 1);
    let url = format!("{}/files/game.zip", server.uri());
    let (item, _) = manager
        .enqueue("game.zip", &url, dir.path().join("game.zip"))
        .expect("enqueue");

    // Let the transfer start, then cancel it mid-flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.cancel(item.id));

    wait_terminal(&item).await;
    assert_eq!(item.status(), DownloadStatus::Failed);
    assert!(matches!(item.error(), Some(ItemError::Cancelled)));
}
