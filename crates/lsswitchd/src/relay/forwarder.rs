//! Passive forwarder — drains the switch lounge into the peer links and
//! the register path.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lsswitch_core::wire::SwitchMessage;
use lsswitch_services::{ConnectionHub, HttpRequest, HttpRequestKind, LocalClientLounge};

/// Drain the switch lounge until shutdown.
pub async fn forward_loop(
    mut lounge_rx: mpsc::Receiver<SwitchMessage>,
    hub: Arc<ConnectionHub>,
    clients: Arc<LocalClientLounge>,
    http_tx: mpsc::Sender<HttpRequest>,
    self_ip: IpAddr,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = lounge_rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        forward_one(msg, &hub, &clients, &http_tx, self_ip, &cancel).await;
    }
}

/// Fan one record out to every peer link except its link of origin, then
/// register the local clients with the announcing client if it lives on
/// another subnet.
///
/// The TTL decrement accumulates in the shared payload across the loop, so
/// the i-th peer receives `ttl - i`. Sends into outbound queues block: a
/// slow peer backpressures this loop, never the ingress paths.
pub(crate) async fn forward_one(
    mut msg: SwitchMessage,
    hub: &ConnectionHub,
    clients: &LocalClientLounge,
    http_tx: &mpsc::Sender<HttpRequest>,
    self_ip: IpAddr,
    cancel: &CancellationToken,
) {
    let origin = msg.source_addr.map(|addr| addr.to_string());
    for conn in hub.connections_except(origin.as_deref()) {
        msg.payload.discovery_ttl = msg.payload.discovery_ttl.saturating_sub(1);
        if msg.payload.discovery_ttl == 0 {
            tracing::debug!(remote = %conn.remote, "discovery TTL exhausted, skipping peer");
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

    let original: IpAddr = match msg.payload.original_addr.parse() {
        Ok(original) => original,
        Err(_) => {
            tracing::debug!(addr = %msg.payload.original_addr, "unparseable original address, skipping register");
            return;
        }
    };
    if original == self_ip {
        // The announce came from this host; our local clients saw it on
        // the wire already.
        return;
    }

    let endpoint = SocketAddr::new(original, msg.payload.port as u16);
    for info in clients.snapshot() {
        let body = match serde_json::to_vec(&info) {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(error = %err, "failed to serialize client info");
                continue;
            }
        };
        let request = HttpRequest {
            url: format!(
                "{}://{}/api/localsend/v2/register",
                msg.payload.protocol, endpoint
            ),
            kind: HttpRequestKind::PostJson(body.into()),
            // Fire-and-forget: nobody waits on a registration.
            respond_to: None,
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = http_tx.send(request) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
