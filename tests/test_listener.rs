use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use solis_bridge::channels::Channels;
use solis_bridge::config::{self, Config, ConfigWrapper};
use solis_bridge::error::ListenerError;
use solis_bridge::snapshot::SnapshotStore;
use solis_bridge::solis::listener::{ChannelData, Listener, PacketStats, Session};
use solis_bridge::solis::packet::{decode_frame, END_BYTE, FRAME_LEN, START_BYTE};

fn listener_config(reply_to_unknown_frames: bool) -> config::Listener {
    config::Listener {
        enabled: true,
        port: 0,
        reply_to_unknown_frames,
        use_tcp_nodelay: None,
        tcp_keepalive_secs: None,
    }
}

fn valid_frame(power: u16) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[0] = START_BYTE;
    frame[FRAME_LEN - 1] = END_BYTE;
    frame[33] = 0x00;
    frame[34] = 0x32;
    frame[35] = 0x01;
    frame[36] = 0x90;
    frame[57] = 0x27;
    frame[58] = 0x10;
    frame[59] = (power >> 8) as u8;
    frame[60] = power as u8;
    frame
}

fn session(channels: &Channels, reply: bool) -> Session {
    Session::new(
        "127.0.0.1:8899".parse().unwrap(),
        listener_config(reply),
        channels.clone(),
        Arc::new(Mutex::new(PacketStats::default())),
    )
}

/// A free local port. Bound briefly and released; the race window until the
/// subject rebinds it is small enough for tests.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config_for_port(port: u16) -> ConfigWrapper {
    let config: Config = serde_yaml::from_str(&format!("listener:\n  port: {}\n", port)).unwrap();
    ConfigWrapper::from_config(config)
}

#[tokio::test]
async fn malformed_then_valid_chunk_publishes_exactly_once() {
    let channels = Channels::new();
    let mut rx = channels.from_listener.subscribe();
    let subject = session(&channels, false);

    assert!(subject.handle_frame(&[0x68; 10]).is_none());
    assert!(subject.handle_frame(&valid_frame(0x0064)).is_none());

    let mut snapshots = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let ChannelData::Snapshot(snapshot) = msg {
            snapshots.push(snapshot);
        }
    }

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].get("current_power_apo_t1_W"), Some(100.0));
    assert_eq!(snapshots[0].get("dv1"), Some(5.0));
}

#[tokio::test]
async fn unknown_frame_gets_reply_only_when_configured() {
    let channels = Channels::new();
    let _rx = channels.from_listener.subscribe();

    let silent = session(&channels, false);
    assert!(silent.handle_frame(&[0x68; 10]).is_none());

    let replying = session(&channels, true);
    let reply = replying.handle_frame(&[0x68; 10]).unwrap();
    assert_eq!(reply.len(), 23);
    assert_eq!(reply[0], START_BYTE);
    assert_eq!(*reply.last().unwrap(), END_BYTE);

    // a decodable frame never triggers a reply, even when configured
    assert!(replying.handle_frame(&valid_frame(0x0064)).is_none());
}

#[tokio::test]
async fn bind_conflict_is_surfaced_and_stop_is_a_noop() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let listener = Listener::new(config_for_port(port), Channels::new());
    let err = listener.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ListenerError>(),
        Some(ListenerError::Bind { .. })
    ));

    // stop after a failed start must not panic or hang
    listener.stop();
}

#[tokio::test]
async fn disabled_listener_never_binds() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    // the port is held, so any bind attempt would fail with AddrInUse
    let config: Config =
        serde_yaml::from_str(&format!("listener:\n  enabled: false\n  port: {}\n", port)).unwrap();
    let listener = Listener::new(ConfigWrapper::from_config(config), Channels::new());

    listener.start().await.unwrap();
}

#[tokio::test]
async fn open_session_outlives_listener_stop() {
    let port = free_port();
    let channels = Channels::new();

    let store = SnapshotStore::new(channels.clone(), None);
    let store_clone = store.clone();
    let store_handle = tokio::spawn(async move { store_clone.start().await });

    let listener = Listener::new(config_for_port(port), channels.clone());
    let listener_clone = listener.clone();
    let listener_handle = tokio::spawn(async move { listener_clone.start().await });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // stopping the listener only stops the accept loop
    listener.stop();
    listener_handle.await.unwrap().unwrap();

    // the already-open session must still receive, decode and publish
    conn.write_all(&valid_frame(0x0190)).await.unwrap();
    conn.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let latest = store
        .latest()
        .expect("session stopped publishing after listener stop");
    assert_eq!(latest.get("current_power_apo_t1_W"), Some(400.0));

    // the session drains naturally on peer disconnect
    drop(conn);
    store.stop();
    store_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_connections_never_produce_a_torn_snapshot() {
    let port = free_port();
    let channels = Channels::new();
    let config = config_for_port(port);

    let store = SnapshotStore::new(channels.clone(), None);
    let store_clone = store.clone();
    let store_handle = tokio::spawn(async move { store_clone.start().await });

    let listener = Listener::new(config, channels.clone());
    let listener_clone = listener.clone();
    let listener_handle = tokio::spawn(async move { listener_clone.start().await });

    // give the listener time to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    let frame_a = valid_frame(0x0064);
    let frame_b = valid_frame(0x00C8);

    let mut conn_a = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut conn_b = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    futures::try_join!(conn_a.write_all(&frame_a), conn_b.write_all(&frame_b)).unwrap();
    conn_a.flush().await.unwrap();
    conn_b.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let expected_a = decode_frame(&frame_a).unwrap();
    let expected_b = decode_frame(&frame_b).unwrap();
    let latest = store.latest().expect("no snapshot published");
    assert!(
        latest == expected_a || latest == expected_b,
        "latest snapshot mixes fields from both frames: {:?}",
        latest
    );

    drop(conn_a);
    drop(conn_b);
    listener.stop();
    store.stop();
    listener_handle.await.unwrap().unwrap();
    store_handle.await.unwrap().unwrap();
}
