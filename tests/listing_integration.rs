//! Integration tests for listing fetches against a mock HTTP server.

use mirador_core::{Client, ClientError};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING_HTML: &str = r#"
<html><body><h1>Index of /files/</h1><table>
  <tr><th>Name</th><th>Size</th><th>Last modified</th></tr>
  <tr><td><a href="../">Parent Directory</a></td><td>-</td><td></td></tr>
  <tr><td><a href="No-Intro/">No-Intro/</a></td><td>-</td><td>2026-02-01 09:00</td></tr>
  <tr><td><a href="readme.txt">readme.txt</a></td><td>1.5K</td><td>2026-01-15 12:30</td></tr>
</table></body></html>"#;

fn client_for(server: &MockServer) -> Client {
    let base = format!("{}/files/", server.uri());
    Client::new(&base, 100.0).expect("client should build")
}

#[tokio::test]
async fn test_list_directory_parses_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/"))
        .and(header_exists("user-agent"))
        .and(header_exists("referer"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING_HTML))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let entries = client.list_directory("").await.expect("listing should parse");

    assert_eq!(entries.len(), 2, "parent link must be dropped");
    assert_eq!(entries[0].name, "No-Intro");
    assert!(entries[0].is_dir);
    assert_eq!(entries[1].name, "readme.txt");
    assert!(!entries[1].is_dir);
    assert_eq!(entries[1].size, "1.5K");
}

#[tokio::test]
async fn test_list_directory_resolves_relative_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/No-Intro/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<a href="game.zip">game.zip</a>"#),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let entries = client
        .list_directory("No-Intro")
        .await
        .expect("listing should parse");

    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].url,
        format!("{}/files/No-Intro/game.zip", server.uri())
    );
}

#[tokio::test]
async fn test_list_directory_non_200_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/missing/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .list_directory("missing/")
        .await
        .expect_err("404 must fail");

    match err {
        ClientError::HttpStatus { status, .. } => assert_eq!(status, 404),
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_directory_network_error() {
    // Nothing is listening on this port.
    let client = Client::new("http://127.0.0.1:1/files/", 100.0).expect("client should build");
    let err = client.list_directory("").await.expect_err("must fail");
    assert!(matches!(err, ClientError::Network { .. }));
}
