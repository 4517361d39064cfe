
use plist::Value;

use jitstreamer_runner::config::MuxerConfig;
use jitstreamer_runner::muxer::{Multiplexer, MuxerClient};
use test_harness::{FakeNetmuxd, MuxerReply};

fn client_for(daemon: &FakeNetmuxd) -> MuxerClient {
    MuxerClient::new(MuxerConfig::default().with_socket_path(&daemon.socket_path))
}

fn field(packet: &jitstreamer_runner::muxer::RawPacket, key: &str) -> Option<String> {
    packet
        .payload
        .get(key)
        .and_then(Value::as_string)
        .map(str::to_string)
}

#[tokio::test]
async fn add_device_accepted_on_result_one() {
    let mut daemon = FakeNetmuxd::start(MuxerReply::Result(1)).await;
    let client = client_for(&daemon);

    assert!(client.add_device("10.0.0.5", "AAA").await);

    let packet = daemon.next_packet().await.expect("daemon saw no request");
    assert_eq!((packet.version, packet.message_type, packet.tag), (69, 69, 69));
    assert_eq!(field(&packet, "MessageType").as_deref(), Some("AddDevice"));
    assert_eq!(field(&packet, "ConnectionType").as_deref(), Some("Network"));
    assert_eq!(
        field(&packet, "ServiceName").as_deref(),
        Some("_apple-mobdev2._tcp.local")
    );
    assert_eq!(field(&packet, "IPAddress").as_deref(), Some("10.0.0.5"));
    assert_eq!(field(&packet, "DeviceID").as_deref(), Some("AAA"));
}

#[tokio::test]
async fn add_device_rejected_on_other_result() {
    let daemon = FakeNetmuxd::start(MuxerReply::Result(0)).await;
    assert!(!client_for(&daemon).add_device("10.0.0.5", "AAA").await);
}

#[tokio::test]
async fn add_device_rejected_on_truncated_reply() {
    let daemon = FakeNetmuxd::start(MuxerReply::Truncated).await;
    assert!(!client_for(&daemon).add_device("10.0.0.5", "AAA").await);
}

#[tokio::test]
async fn add_device_rejected_when_daemon_hangs_up() {
    let daemon = FakeNetmuxd::start(MuxerReply::Hangup).await;
    assert!(!client_for(&daemon).add_device("10.0.0.5", "AAA").await);
}

#[tokio::test]
async fn add_device_rejected_without_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let client =
        MuxerClient::new(MuxerConfig::default().with_socket_path(dir.path().join("absent.sock")));
    assert!(!client.add_device("10.0.0.5", "AAA").await);
}

#[tokio::test]
async fn remove_device_sends_request() {
    let mut daemon = FakeNetmuxd::start(MuxerReply::Result(1)).await;
    client_for(&daemon).remove_device("AAA").await;

    let packet = daemon.next_packet().await.expect("daemon saw no request");
    assert_eq!(field(&packet, "MessageType").as_deref(), Some("RemoveDevice"));
    assert_eq!(field(&packet, "DeviceID").as_deref(), Some("AAA"));
    assert_eq!(packet.payload.len(), 2);
}

#[tokio::test]
async fn custom_header_fields_are_sent() {
    let mut daemon = FakeNetmuxd::start(MuxerReply::Result(1)).await;
    let config = MuxerConfig {
        version: 1,
        message_type: 8,
        tag: 3,
        ..MuxerConfig::default()
    }
    .with_socket_path(&daemon.socket_path);

    assert!(MuxerClient::new(config).add_device("10.0.0.5", "AAA").await);
    let packet = daemon.next_packet().await.unwrap();
    assert_eq!((packet.version, packet.message_type, packet.tag), (1, 8, 3));
}
