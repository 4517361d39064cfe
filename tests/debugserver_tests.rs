
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use jitstreamer_runner::config::DebugConfig;
use jitstreamer_runner::debugserver::{
    connect_and_enable_jit, enable_jit, encode_command, DetachOutcome, HandshakeError,
};
use jitstreamer_runner::error::RunnerError;
use test_harness::{DebugScript, FakeDebugserver};

fn config() -> DebugConfig {
    DebugConfig {
        read_timeout: Duration::from_millis(500),
        ..DebugConfig::default()
    }
}

#[tokio::test]
async fn attach_then_detach_over_tcp() {
    let server = FakeDebugserver::start(DebugScript::well_behaved()).await;

    let outcome = connect_and_enable_jit(server.addr, 1234, &config())
        .await
        .unwrap();
    assert_eq!(outcome, DetachOutcome::Detached);

    assert_eq!(
        server.received().await,
        vec!["QStartNoAckMode", "QSetDetachOnError:1", "vAttach;4d2", "D"]
    );
}

#[tokio::test]
async fn attach_error_skips_detach() {
    let server = FakeDebugserver::start(DebugScript::attach_error("E96")).await;

    let err = connect_and_enable_jit(server.addr, 1234, &config())
        .await
        .unwrap_err();
    match err.into_runner_error("AAA", "com.example.app", 1234) {
        RunnerError::AttachFailure { pid, reply } => {
            assert_eq!(pid, 1234);
            assert_eq!(reply, "E96");
        }
        other => panic!("unexpected error: {other}"),
    }

    let commands = server.received().await;
    assert!(!commands.iter().any(|c| c == "D"));
}

#[tokio::test]
async fn silent_detach_is_a_warning_not_an_error() {
    let mut script = DebugScript::well_behaved();
    script.on_detach = None;
    let server = FakeDebugserver::start(script).await;

    let outcome = connect_and_enable_jit(server.addr, 7, &config())
        .await
        .unwrap();
    assert!(matches!(outcome, DetachOutcome::StillAttached(_)));
}

#[tokio::test]
async fn detach_error_reply_is_still_attached() {
    let mut script = DebugScript::well_behaved();
    script.on_detach = Some(encode_command("E01"));
    let server = FakeDebugserver::start(script).await;

    let outcome = connect_and_enable_jit(server.addr, 7, &config())
        .await
        .unwrap();
    assert_eq!(outcome, DetachOutcome::StillAttached("E01".to_string()));
}

#[tokio::test]
async fn oversized_detach_reply_is_still_attached() {
    let mut script = DebugScript::well_behaved();
    let mut garbage = b"$".to_vec();
    garbage.extend(std::iter::repeat(b'x').take(5000));
    script.on_detach = Some(garbage);
    let server = FakeDebugserver::start(script).await;

    let outcome = connect_and_enable_jit(server.addr, 1234, &config())
        .await
        .unwrap();
    match outcome {
        DetachOutcome::StillAttached(reason) => assert!(reason.contains("4096"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_is_launch_failure() {
    // Bind then drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = connect_and_enable_jit(addr, 1, &config()).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Io(_)));
    let err = err.into_runner_error("AAA", "com.example.app", 1);
    assert!(matches!(err, RunnerError::LaunchFailure { .. }));
    assert!(err.to_string().starts_with("Error launching app com.example.app on AAA"));
}

#[tokio::test]
async fn replies_split_across_reads() {
    let (client, mut server) = tokio::io::duplex(64);

    let device = tokio::spawn(async move {
        let mut buf = vec![0u8; 256];
        let mut seen = Vec::new();
        // Wait for the whole pipelined request
        while !String::from_utf8_lossy(&seen).contains("vAttach") {
            let n = server.read(&mut buf).await.unwrap();
            seen.extend_from_slice(&buf[..n]);
        }
        let stop = encode_command("T05thread:1;");
        for chunk in stop.chunks(3) {
            server.write_all(chunk).await.unwrap();
            server.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$D#44");
        server.write_all(b"+").await.unwrap();
        seen
    });

    let outcome = enable_jit(client, 0x1f, &config()).await.unwrap();
    assert_eq!(outcome, DetachOutcome::Detached);

    let request = String::from_utf8(device.await.unwrap()).unwrap();
    assert_eq!(
        request,
        "$QStartNoAckMode#b0$QSetDetachOnError:1#f8$vAttach;1f#9d"
    );
}

#[tokio::test]
async fn closed_stream_before_attach_reply() {
    let (client, server) = tokio::io::duplex(256);
    drop(server);
    let err = enable_jit(client, 1, &config()).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Io(_) | HandshakeError::Attach(_)));
}
