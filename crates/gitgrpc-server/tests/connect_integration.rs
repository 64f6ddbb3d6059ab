#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests for `Git.Connect` over a real TCP listener.
//!
//! The backing commands are stand-ins: `git-upload-pack` and
//! `git-receive-pack` in a temporary exec path are symlinks to `/bin/sh`,
//! and each "repository" under the repository root is a shell script.

use std::os::unix::fs::symlink;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use gitgrpc_core::{REPOSITORY_KEY, SERVICE_KEY, StreamMetadata};
use gitgrpc_proto::v1::Data;
use gitgrpc_proto::v1::git_client::GitClient;
use gitgrpc_server::{GrpcServer, RECEIVE_PACK, ServerConfig, UPLOAD_PACK};

struct Fixture {
    exec_dir: TempDir,
    repo_root: TempDir,
    channel: Channel,
    client: GitClient<Channel>,
    _server: tokio::task::JoinHandle<()>,
}

impl Fixture {
    async fn start() -> Self {
        let exec_dir = TempDir::new().unwrap();
        for service in [UPLOAD_PACK, RECEIVE_PACK, "sh"] {
            symlink("/bin/sh", exec_dir.path().join(service)).unwrap();
        }
        let repo_root = TempDir::new().unwrap();
        write_script(repo_root.path(), "echo.git", "exec cat\n");
        write_script(
            repo_root.path(),
            "broken.git",
            "printf 'fatal: not a git repository' >&2\nexit 128\n",
        );

        let config = ServerConfig::tcp("127.0.0.1:0".parse().unwrap())
            .with_exec_path(Some(exec_dir.path().to_path_buf()))
            .with_repo_root(Some(repo_root.path().to_path_buf()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            GrpcServer::new(config)
                .serve_listener(listener, std::future::pending())
                .await
                .unwrap();
        });

        let channel = Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap();
        Self {
            exec_dir,
            repo_root,
            client: GitClient::new(channel.clone()),
            channel,
            _server: server,
        }
    }

    /// Open a stream with the given metadata, send `input`, half-close, and
    /// collect everything the server returns.
    async fn exchange(
        &self,
        service: &str,
        repository: &str,
        input: Vec<u8>,
    ) -> (Vec<u8>, Result<(), Status>) {
        let mut request_md = tonic::metadata::MetadataMap::new();
        StreamMetadata::new(service, repository)
            .attach(&mut request_md)
            .unwrap();
        self.exchange_with_metadata(request_md, input).await
    }

    async fn exchange_with_metadata(
        &self,
        metadata: tonic::metadata::MetadataMap,
        input: Vec<u8>,
    ) -> (Vec<u8>, Result<(), Status>) {
        let (tx, rx) = mpsc::channel::<Data>(8);
        let sender = tokio::spawn(async move {
            for chunk in input.chunks(1024) {
                if tx.send(Data { data: chunk.to_vec() }).await.is_err() {
                    break;
                }
            }
        });

        let mut request = Request::new(ReceiverStream::new(rx));
        *request.metadata_mut() = metadata;

        let mut client = self.client.clone();
        let mut inbound = match client.connect(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => return (Vec::new(), Err(status)),
        };

        let mut output = Vec::new();
        let result = loop {
            match inbound.message().await {
                Ok(Some(msg)) => output.extend_from_slice(&msg.data),
                Ok(None) => break Ok(()),
                Err(status) => break Err(status),
            }
        };
        sender.abort();
        (output, result)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).unwrap();
}

#[tokio::test]
async fn upload_pack_echoes_bytes() {
    let fx = Fixture::start().await;
    let input = b"0032want 0a53e9ddeaddad63ad106860237bbf53411d11a7\n0000".to_vec();

    let (output, result) = fx.exchange(UPLOAD_PACK, "echo.git", input.clone()).await;
    result.unwrap();
    assert_eq!(output, input);
}

#[tokio::test]
async fn receive_pack_echoes_bytes() {
    let fx = Fixture::start().await;
    let (output, result) = fx
        .exchange(RECEIVE_PACK, "echo.git", b"push payload".to_vec())
        .await;
    result.unwrap();
    assert_eq!(output, b"push payload");
}

#[tokio::test]
async fn large_payload_survives_framing() {
    let fx = Fixture::start().await;
    let input: Vec<u8> = (0..512 * 1024u32)
        .map(|i| u8::try_from(i % 251).unwrap())
        .collect();

    let (output, result) = fx.exchange(UPLOAD_PACK, "echo.git", input.clone()).await;
    result.unwrap();
    assert_eq!(output.len(), input.len());
    assert_eq!(output, input);
}

#[tokio::test]
async fn empty_session_completes() {
    let fx = Fixture::start().await;
    let (output, result) = fx.exchange(UPLOAD_PACK, "echo.git", Vec::new()).await;
    result.unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn disallowed_service_is_rejected_without_spawning() {
    let fx = Fixture::start().await;
    let marker = fx.repo_root.path().join("spawned");
    write_script(
        fx.repo_root.path(),
        "mark.git",
        &format!(": > '{}'\n", marker.display()),
    );
    assert!(fx.exec_dir.path().join("sh").exists());

    let (output, result) = fx.exchange("sh", "mark.git", Vec::new()).await;
    let status = result.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "bad service: sh");
    assert!(output.is_empty());
    assert!(!marker.exists(), "rejected service must not run");
}

#[tokio::test]
async fn missing_metadata_is_invalid_argument() {
    let fx = Fixture::start().await;

    let mut only_service = tonic::metadata::MetadataMap::new();
    only_service.insert(SERVICE_KEY, UPLOAD_PACK.parse().unwrap());
    let (_, result) = fx.exchange_with_metadata(only_service, Vec::new()).await;
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);

    let mut only_repository = tonic::metadata::MetadataMap::new();
    only_repository.insert(REPOSITORY_KEY, "echo.git".parse().unwrap());
    let (_, result) = fx.exchange_with_metadata(only_repository, Vec::new()).await;
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn repeated_metadata_is_invalid_argument() {
    let fx = Fixture::start().await;
    let mut md = tonic::metadata::MetadataMap::new();
    StreamMetadata::new(UPLOAD_PACK, "echo.git")
        .attach(&mut md)
        .unwrap();
    md.append(SERVICE_KEY, RECEIVE_PACK.parse().unwrap());

    let (_, result) = fx.exchange_with_metadata(md, Vec::new()).await;
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn escaping_repository_is_rejected() {
    let fx = Fixture::start().await;
    for repository in ["../echo.git", "/etc/passwd", "-c"] {
        let (_, result) = fx.exchange(UPLOAD_PACK, repository, Vec::new()).await;
        assert_eq!(
            result.unwrap_err().code(),
            Code::InvalidArgument,
            "{repository:?}"
        );
    }
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let fx = Fixture::start().await;
    let (_, result) = fx.exchange(UPLOAD_PACK, "missing.git", Vec::new()).await;
    assert_eq!(result.unwrap_err().code(), Code::NotFound);
}

#[tokio::test]
async fn command_failure_carries_stderr() {
    let fx = Fixture::start().await;
    let (_, result) = fx.exchange(UPLOAD_PACK, "broken.git", Vec::new()).await;
    let status = result.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(
        status.message(),
        "git-upload-pack failed: fatal: not a git repository"
    );
}

#[tokio::test]
async fn command_failure_reported_while_request_stream_open() {
    let fx = Fixture::start().await;
    let mut request_md = tonic::metadata::MetadataMap::new();
    StreamMetadata::new(UPLOAD_PACK, "broken.git")
        .attach(&mut request_md)
        .unwrap();

    // git keeps its side open while it waits for the ref advertisement.
    let (_tx, rx) = mpsc::channel::<Data>(8);
    let mut request = Request::new(ReceiverStream::new(rx));
    *request.metadata_mut() = request_md;

    let mut client = fx.client.clone();
    let status = match client.connect(request).await {
        Ok(response) => {
            let mut inbound = response.into_inner();
            tokio::time::timeout(Duration::from_secs(5), inbound.message())
                .await
                .unwrap()
                .unwrap_err()
        }
        Err(status) => status,
    };
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(
        status.message(),
        "git-upload-pack failed: fatal: not a git repository"
    );
}

#[tokio::test]
async fn symlink_out_of_repository_root_is_rejected() {
    let fx = Fixture::start().await;
    let outside = TempDir::new().unwrap();
    write_script(outside.path(), "secret.git", "exec cat\n");
    symlink(outside.path(), fx.repo_root.path().join("linked")).unwrap();

    let (_, result) = fx
        .exchange(UPLOAD_PACK, "linked/secret.git", Vec::new())
        .await;
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn health_reports_git_service_serving() {
    use tonic_health::pb::HealthCheckRequest;
    use tonic_health::pb::health_check_response::ServingStatus;
    use tonic_health::pb::health_client::HealthClient;

    let fx = Fixture::start().await;
    let mut health = HealthClient::new(fx.channel.clone());
    let response = health
        .check(HealthCheckRequest {
            service: "gitgrpc.v1.Git".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status(), ServingStatus::Serving);
}
