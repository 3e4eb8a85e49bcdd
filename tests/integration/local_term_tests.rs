//! Local-socket transport tests.

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::GenericFilePath;
use jobterm::server::ShellServer;
use jobterm::shell::controller::JobController;
use jobterm::term::local::LocalTermServer;
use jobterm::term::TermServer;
use jobterm::AppError;
use tokio::io::AsyncWriteExt;

use super::test_helpers::{read_until, TestCommands};

fn shell_server(cache: &tempfile::TempDir) -> ShellServer {
    let server = ShellServer::new(Arc::new(JobController::new(cache.path(), false)), "> ");
    server.register_resolver(Arc::new(jobterm::commands::BuiltinCommands::new()));
    server.register_resolver(Arc::new(TestCommands));
    server
}

#[cfg(unix)]
#[tokio::test]
async fn local_socket_session_runs_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = shell_server(&dir);
    let path = dir.path().join("jobterm.sock").display().to_string();

    let mut local = LocalTermServer::new(path.clone(), Duration::from_secs(2));
    let address = local.listen(server.term_handler()).await.expect("listen");
    assert_eq!(address, path);

    let name = path.as_str().to_fs_name::<GenericFilePath>().expect("name");
    let stream = Stream::connect(name).await.expect("connect");
    let (mut reader, mut writer) = stream.split();

    let banner = read_until(&mut reader, "> ").await;
    assert!(banner.contains("session: "), "banner {banner:?}");

    writer.write_all(b"lines x y | wc -l\n").await.expect("write");
    assert_eq!(read_until(&mut reader, "> ").await, "2\n> ");

    writer.write_all(b"session\n").await.expect("write");
    let info = read_until(&mut reader, "> ").await;
    let session_id = server
        .sessions()
        .get(
            info.lines()
                .next()
                .and_then(|l| l.strip_prefix("session: "))
                .expect("session line"),
        )
        .map(|s| s.id().to_owned());
    assert!(session_id.is_some(), "session listed in registry: {info:?}");

    local.close().await.expect("close");
}

#[tokio::test]
async fn close_without_listen_is_an_error() {
    let mut local = LocalTermServer::new("jobterm-never-started.sock", Duration::from_secs(2));
    assert!(matches!(
        local.close().await,
        Err(AppError::TransportBind(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn unreachable_socket_path_fails_to_bind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = shell_server(&dir);
    let path = dir
        .path()
        .join("missing")
        .join("jobterm.sock")
        .display()
        .to_string();

    let mut local = LocalTermServer::new(path, Duration::from_secs(2));
    let err = local
        .listen(server.term_handler())
        .await
        .expect_err("parent directory does not exist");
    assert!(matches!(err, AppError::TransportBind(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn bind_is_bounded_by_connection_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = shell_server(&dir);
    let path = dir.path().join("bounded.sock").display().to_string();

    let mut local = LocalTermServer::new(path, Duration::ZERO);
    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        local.listen(server.term_handler()),
    )
    .await
    .expect("listen returns within the outer deadline");
    match outcome {
        Ok(_) => local.close().await.expect("close"),
        Err(AppError::TransportBind(msg)) => assert!(msg.contains("timed out"), "{msg}"),
        Err(other) => panic!("unexpected error {other:?}"),
    }
}
