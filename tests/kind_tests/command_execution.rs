//! Integration tests for command execution
//!
//! These tests tell the story of a user running programs in the cluster the
//! way they would run local processes.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use kube_exec::{Cmd, Error, Phase};

use super::helpers::{cluster_api, test_config, unique_name};

/// Story: a shell reads piped input and answers on stdout
#[tokio::test]
#[ignore]
async fn story_shell_reads_piped_stdin() {
    let api = cluster_api().await;
    let (stdout, mut reader) = tokio::io::duplex(64 * 1024);

    let mut cmd = Cmd::command(
        api,
        test_config(),
        unique_name("kube-exec-cat"),
        "/bin/sh",
        ["-c", "sleep 2; cat"],
    );
    cmd.stdout(Box::new(stdout));
    let mut stdin = cmd.stdin_pipe().expect("pipe before start");

    let feeder = tokio::spawn(async move {
        stdin.write_all(b"hello from the test\n").await.unwrap();
        stdin.shutdown().await.unwrap();
    });

    cmd.run().await.expect("command should run");
    feeder.await.unwrap();
    drop(cmd);

    let mut out = String::new();
    reader.read_to_string(&mut out).await.unwrap();
    assert!(out.contains("hello from the test"), "got {:?}", out);
}

/// Story: output of a command is always delivered to stdout
///
/// Depending on how fast the pod finishes the output comes either from the
/// attached stream or from timestamped logs.
#[tokio::test]
#[ignore]
async fn story_quick_command_output_reaches_stdout() {
    let api = cluster_api().await;
    let (stdout, mut reader) = tokio::io::duplex(64 * 1024);

    let mut cmd = Cmd::command(
        api,
        test_config(),
        unique_name("kube-exec-echo"),
        "/bin/echo",
        ["hi"],
    );
    cmd.stdout(Box::new(stdout));
    cmd.run().await.expect("command should run");

    let phase = cmd.handle().map(|h| h.phase());
    assert!(matches!(phase, Some(Phase::Running) | Some(Phase::Succeeded)));
    drop(cmd);

    let mut out = String::new();
    reader.read_to_string(&mut out).await.unwrap();
    assert!(out.trim_end().ends_with("hi"), "got {:?}", out);
}

/// Story: a command that exits non-zero before being attached to
#[tokio::test]
#[ignore]
async fn story_failing_command_reports_failure_or_runs() {
    let api = cluster_api().await;

    let mut config = test_config();
    config.watch_timeout_secs = 120;
    let mut cmd = Cmd::command(
        api,
        config,
        unique_name("kube-exec-false"),
        "/bin/false",
        Vec::<String>::new(),
    );

    // OnFailure restarts the container, so a wait may also catch it running
    match cmd.run().await {
        Ok(()) => assert_eq!(cmd.handle().unwrap().phase(), Phase::Running),
        Err(e) => assert!(
            matches!(e.root(), Error::ObjectFailed { .. } | Error::WatchTimeout { .. }),
            "unexpected error: {}",
            e
        ),
    }
}
