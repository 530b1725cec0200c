//! Proactive broadcaster — periodically re-announces the local clients to
//! every connected peer.
//!
//! The broadcast path deliberately bypasses the switch lounge: local
//! announces must keep propagating even when the dedup cache is saturated,
//! and a synthesized announce was never received from anywhere, so there is
//! no link of origin to suppress.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lsswitch_core::wire::{next_discovery_seq, SwitchMessage};
use lsswitch_services::{ConnectionHub, LocalClientLounge};

/// Re-announce the local clients every `interval` until shutdown.
pub async fn broadcast_loop(
    node_id: String,
    self_ip: IpAddr,
    interval: Duration,
    hub: Arc<ConnectionHub>,
    clients: Arc<LocalClientLounge>,
    cancel: CancellationToken,
) {
    let first = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(first, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => broadcast_once(&node_id, self_ip, &hub, &clients, &cancel).await,
        }
    }
}

/// One broadcast round: a fresh announce per local client, fanned out to
/// the connection snapshot taken at the top of the round.
///
/// As in the forwarder, the TTL decrement accumulates in the shared
/// payload, so the i-th peer of a round receives `255 - i`.
pub(crate) async fn broadcast_once(
    node_id: &str,
    self_ip: IpAddr,
    hub: &ConnectionHub,
    clients: &LocalClientLounge,
    cancel: &CancellationToken,
) {
    let conns = hub.all_connections();
    if conns.is_empty() {
        return;
    }
    for info in clients.snapshot() {
        let mut msg = SwitchMessage {
            source_addr: None,
            payload: info.to_discovery(node_id, next_discovery_seq(), self_ip),
        };
        for conn in &conns {
            msg.payload.discovery_ttl = msg.payload.discovery_ttl.saturating_sub(1);
            if msg.payload.discovery_ttl == 0 {
                tracing::debug!(remote = %conn.remote, "broadcast TTL exhausted, skipping peer");
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = conn.sender.send(msg.clone()) => {
                    if sent.is_err() {
                        tracing::debug!(remote = %conn.remote, "outbound queue closed, skipping peer");
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lsswitch_core::config::MAX_DISCOVERY_TTL;
    use lsswitch_core::wire::LocalSendClientInfo;
    use tokio_util::sync::CancellationToken;

    const SELF_IP: &str = "192.168.1.20";

    fn client(port: u16) -> LocalSendClientInfo {
        LocalSendClientInfo {
            alias: "laptop".into(),
            port,
            protocol: "http".into(),
            fingerprint: "f1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn broadcast_synthesizes_fresh_announces_per_peer() {
        let hub = ConnectionHub::new(CancellationToken::new());
        let (mut rx_a, _ca) = hub.add_connection("10.0.0.1:7000".parse().unwrap()).unwrap();
        let (mut rx_b, _cb) = hub.add_connection("10.0.0.2:7000".parse().unwrap()).unwrap();
        let clients = LocalClientLounge::new(std::time::Duration::from_secs(60));
        clients.add(client(53317));
        let cancel = CancellationToken::new();

        broadcast_once("0123456789abcdef", SELF_IP.parse().unwrap(), &hub, &clients, &cancel).await;

        let a = rx_a.recv().await.unwrap();
        let b = rx_b.recv().await.unwrap();

        // Same synthesized announce, mutating TTL as it fans out.
        assert_eq!(a.payload.discovery_id(), b.payload.discovery_id());
        let mut ttls = [a.payload.discovery_ttl, b.payload.discovery_ttl];
        ttls.sort();
        assert_eq!(ttls, [MAX_DISCOVERY_TTL - 2, MAX_DISCOVERY_TTL - 1]);

        for msg in [&a, &b] {
            assert_eq!(msg.source_addr, None);
            assert_eq!(msg.payload.switch_id, "0123456789abcdef");
            assert_eq!(msg.payload.original_addr, SELF_IP);
            assert_eq!(msg.payload.port, 53317);
        }
    }

    #[tokio::test]
    async fn each_round_claims_a_new_sequence() {
        let hub = ConnectionHub::new(CancellationToken::new());
        let (mut rx, _c) = hub.add_connection("10.0.0.1:7000".parse().unwrap()).unwrap();
        let clients = LocalClientLounge::new(std::time::Duration::from_secs(60));
        clients.add(client(53317));
        let cancel = CancellationToken::new();
        let self_ip: IpAddr = SELF_IP.parse().unwrap();

        broadcast_once("node", self_ip, &hub, &clients, &cancel).await;
        broadcast_once("node", self_ip, &hub, &clients, &cancel).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_ne!(first.payload.discovery_seq, second.payload.discovery_seq);
    }

    #[tokio::test]
    async fn no_clients_means_no_frames() {
        let hub = ConnectionHub::new(CancellationToken::new());
        let (mut rx, _c) = hub.add_connection("10.0.0.1:7000".parse().unwrap()).unwrap();
        let clients = LocalClientLounge::new(std::time::Duration::from_secs(60));
        let cancel = CancellationToken::new();

        broadcast_once("node", SELF_IP.parse().unwrap(), &hub, &clients, &cancel).await;
        assert!(rx.try_recv().is_err());
    }
}
