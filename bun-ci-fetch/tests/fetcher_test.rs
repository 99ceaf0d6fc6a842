use bun_ci_fetch::context::Context;
use bun_ci_fetch::http::HttpClient;
use bun_ci_fetch::process::ProcessRunner;
use bun_ci_fetch::resolver::{ReleaseResolver, ResolverSettings};
use bun_ci_fetch::retry::RetryConfig;
use bun_ci_fetch::{ArtifactFetcher, CiFetchError};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn fetcher(server: &MockServer) -> ArtifactFetcher {
    let base = Url::parse(&server.uri()).unwrap();
    let settings = ResolverSettings {
        cdn_url: base.join("/releases/").unwrap(),
        api_url: base.clone(),
        repository: "oven-sh/bun".to_string(),
        buildkite_host: "127.0.0.1".to_string(),
        buildkite_url: base,
    };
    let http = HttpClient::new("test", RetryConfig::new(2, Duration::from_millis(1))).unwrap();
    let runner = ProcessRunner::new(Arc::new(Context::new()));
    ArtifactFetcher::new(ReleaseResolver::new(http, settings), runner)
}

async fn serve_archive(server: &MockServer, route: &str, archive: Vec<u8>) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_extracts_executable() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[
        ("bun-linux-x64/LICENSE", b"MIT"),
        ("bun-linux-x64/bun", b"#!/bin/sh\necho 1.1.13\n"),
    ]);
    let expected_sha = hex::encode(Sha256::digest(&archive));
    serve_archive(&server, "/releases/latest/bun-linux-x64.zip", archive).await;

    let artifact = fetcher(&server).fetch("linux-x64", None).await.unwrap();

    assert!(artifact.executable().ends_with("bun-linux-x64/bun"));
    assert!(artifact.executable().starts_with(artifact.dir().canonicalize().unwrap()));
    assert_eq!(
        std::fs::read_to_string(artifact.executable()).unwrap(),
        "#!/bin/sh\necho 1.1.13\n"
    );
    assert_eq!(artifact.sha256(), expected_sha);
    assert_eq!(artifact.url().path(), "/releases/latest/bun-linux-x64.zip");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(artifact.executable())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    let dir = artifact.dir().to_path_buf();
    drop(artifact);
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_fetch_without_executable() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("bun-linux-x64/README.md", b"nothing here")]);
    serve_archive(&server, "/releases/canary/bun-linux-x64.zip", archive).await;

    let err = fetcher(&server)
        .fetch("linux-x64", Some("canary"))
        .await
        .unwrap_err();
    assert!(matches!(err, CiFetchError::ExecutableNotFound { .. }));
}

#[tokio::test]
async fn test_download_failure() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/releases/bun-v1.1.13/bun-darwin-x64.zip"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/releases/bun-v1.1.13/bun-darwin-x64.zip"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = fetcher(&server)
        .fetch("darwin-x64", Some("1.1.13"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to download target: darwin-x64 at 1.1.13"
    );
}

#[tokio::test]
async fn test_unresolvable_release_is_not_downloaded() {
    let server = MockServer::start().await;
    let err = fetcher(&server)
        .fetch("linux-x64", Some("bun-v0.0.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CiFetchError::ReleaseNotFound { .. }));
}
