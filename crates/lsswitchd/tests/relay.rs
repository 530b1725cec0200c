//! Integration tests driving the peer link and the relay plane over real
//! loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lsswitch_core::cipher::PayloadCipher;
use lsswitch_core::wire::{encode_discovery_frame, DiscoveryMessage, TAG_DISCOVERY};
use lsswitch_services::{ConnectionHub, LocalClientLounge, SwitchLounge};
use lsswitchd::{link, relay};

// ── Harness ───────────────────────────────────────────────────────────────────

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn plaintext_cipher() -> Arc<PayloadCipher> {
    Arc::new(PayloadCipher::new("").unwrap())
}

fn discovery(switch_id: &str, seq: u64, ttl: u32) -> DiscoveryMessage {
    DiscoveryMessage {
        switch_id: switch_id.into(),
        discovery_seq: seq,
        discovery_ttl: ttl,
        original_addr: "10.0.1.5".into(),
        alias: "laptop".into(),
        version: "2.0".into(),
        fingerprint: "f1".into(),
        port: 53317,
        protocol: "http".into(),
        ..Default::default()
    }
}

async fn connect_with_retry(port: u16) -> TcpStream {
    for _ in 0..100 {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("server on port {port} never came up");
}

async fn wait_for_connections(hub: &ConnectionHub, count: usize) {
    for _ in 0..100 {
        if hub.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("hub never reached {count} connections");
}

/// Read frames off a raw peer socket until a discovery frame arrives,
/// skipping heartbeats.
async fn read_discovery_frame(stream: &mut TcpStream) -> DiscoveryMessage {
    loop {
        let tag = stream.read_u8().await.unwrap();
        if tag != TAG_DISCOVERY {
            continue; // heartbeat
        }
        let len = stream.read_u32().await.unwrap() as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        return DiscoveryMessage::decode(payload.as_slice()).unwrap();
    }
}

// ── Server side ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn server_accepts_and_relays_inbound_frames() {
    let port = free_port();
    let cancel = CancellationToken::new();
    let hub = ConnectionHub::new(cancel.clone());
    let (peer_tx, mut peer_rx) = mpsc::channel(32);
    let (err_tx, _err_rx) = mpsc::channel(8);

    tokio::spawn(link::serve(
        port,
        hub.clone(),
        peer_tx,
        plaintext_cipher(),
        err_tx,
        cancel.clone(),
    ));

    let mut client = connect_with_retry(port).await;
    let frame = encode_discovery_frame(&discovery("node-y", 1, 255).encode_to_vec());
    client.write_all(&frame).await.unwrap();

    let received = timeout(Duration::from_secs(5), peer_rx.recv())
        .await
        .expect("frame should arrive")
        .unwrap();
    assert_eq!(received.payload, discovery("node-y", 1, 255));
    assert_eq!(
        received.source_addr.unwrap(),
        client.local_addr().unwrap()
    );
    assert_eq!(hub.len(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn server_drops_connection_on_unknown_tag() {
    let port = free_port();
    let cancel = CancellationToken::new();
    let hub = ConnectionHub::new(cancel.clone());
    let (peer_tx, _peer_rx) = mpsc::channel(32);
    let (err_tx, _err_rx) = mpsc::channel(8);

    tokio::spawn(link::serve(
        port,
        hub.clone(),
        peer_tx,
        plaintext_cipher(),
        err_tx,
        cancel.clone(),
    ));

    let mut client = connect_with_retry(port).await;
    wait_for_connections(&hub, 1).await;

    client.write_all(&[0x7f]).await.unwrap();

    // The server closes the socket and deregisters the link.
    let mut buf = [0u8; 8];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("connection should close");
    assert_eq!(read.unwrap(), 0);
    wait_for_connections(&hub, 0).await;

    cancel.cancel();
}

// ── Dialer side ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn dialer_connects_and_sends_framed_payloads() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let hub = ConnectionHub::new(cancel.clone());
    let (recv_tx, _recv_rx) = mpsc::channel(32);
    let (err_tx, _err_rx) = mpsc::channel(8);

    tokio::spawn(link::maintain_peer(
        "127.0.0.1".to_string(),
        port,
        hub.clone(),
        recv_tx,
        plaintext_cipher(),
        10,
        err_tx,
        cancel.clone(),
    ));

    let (mut peer_side, _) = listener.accept().await.unwrap();
    wait_for_connections(&hub, 1).await;

    let conns = hub.all_connections();
    conns[0]
        .sender
        .send(lsswitch_core::wire::SwitchMessage {
            source_addr: None,
            payload: discovery("node-x", 3, 254),
        })
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(5), read_discovery_frame(&mut peer_side))
        .await
        .expect("frame should arrive");
    assert_eq!(received, discovery("node-x", 3, 254));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn dialer_gives_up_after_exhausting_retries() {
    // Bind then drop: nothing listens on this port.
    let port = free_port();
    let cancel = CancellationToken::new();
    let hub = ConnectionHub::new(cancel.clone());
    let (recv_tx, _recv_rx) = mpsc::channel(32);
    let (err_tx, mut err_rx) = mpsc::channel(8);

    tokio::spawn(link::maintain_peer(
        "127.0.0.1".to_string(),
        port,
        hub,
        recv_tx,
        plaintext_cipher(),
        1,
        err_tx,
        cancel.clone(),
    ));

    let fatal = err_rx.recv().await.expect("dialer should report a fatal error");
    assert!(fatal.to_string().contains("maximum retries"));
    cancel.cancel();
}

// ── Relay across links ────────────────────────────────────────────────────────

/// Two raw peers attached to one node: a record arriving from peer A is
/// forwarded to peer B with a decremented TTL, never echoed back to A, and
/// never forwarded twice.
#[tokio::test]
async fn forwarding_skips_origin_and_deduplicates() {
    let port = free_port();
    let cancel = CancellationToken::new();
    let hub = ConnectionHub::new(cancel.clone());
    let (peer_tx, peer_rx) = mpsc::channel(32);
    let (err_tx, _err_rx) = mpsc::channel(8);
    let (http_tx, _http_rx) = mpsc::channel(32);

    let (lounge, lounge_rx) = SwitchLounge::new();
    let clients = LocalClientLounge::new(Duration::from_secs(60));
    let self_ip = "192.168.1.20".parse().unwrap();

    tokio::spawn(link::serve(
        port,
        hub.clone(),
        peer_tx,
        plaintext_cipher(),
        err_tx,
        cancel.clone(),
    ));
    tokio::spawn(relay::pump_peer_messages(peer_rx, lounge.clone(), cancel.clone()));
    tokio::spawn(relay::forward_loop(
        lounge_rx,
        hub.clone(),
        clients,
        http_tx,
        self_ip,
        cancel.clone(),
    ));

    let mut peer_a = connect_with_retry(port).await;
    let mut peer_b = connect_with_retry(port).await;
    wait_for_connections(&hub, 2).await;

    let frame = encode_discovery_frame(&discovery("node-y", 9, 255).encode_to_vec());
    peer_a.write_all(&frame).await.unwrap();

    let relayed = timeout(Duration::from_secs(5), read_discovery_frame(&mut peer_b))
        .await
        .expect("peer B should receive the forwarded record");
    assert_eq!(relayed.discovery_ttl, 254);
    assert_eq!(relayed.switch_id, "node-y");
    assert_eq!(relayed.discovery_seq, 9);

    // The origin link must not see its own record back.
    let mut buf = [0u8; 1];
    assert!(
        timeout(Duration::from_secs(1), peer_a.read(&mut buf)).await.is_err(),
        "peer A received an echo of its own record"
    );

    // A duplicate of the same record is absorbed by the lounge.
    peer_a.write_all(&frame).await.unwrap();
    assert!(
        timeout(Duration::from_secs(1), read_discovery_frame(&mut peer_b))
            .await
            .is_err(),
        "duplicate record was forwarded twice"
    );

    cancel.cancel();
}
