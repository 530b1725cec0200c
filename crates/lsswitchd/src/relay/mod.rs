//! Relay plane — the loops that move discovery records between the
//! multicast ingress, the lounges, the peer links, and LocalSend's HTTP
//! surface.

mod broadcaster;
mod forwarder;
mod prober;

pub use broadcaster::broadcast_loop;
pub use forwarder::forward_loop;
pub use prober::probe_loop;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lsswitch_core::wire::SwitchMessage;
use lsswitch_services::{LocalClientLounge, SwitchLounge};

/// Feed locally captured announces into the relay plane.
///
/// Every admitted multicast record describes a client on this host, so it
/// lands in the local-client lounge as well as the switch lounge. Lounge
/// backpressure drops the record; the announce will come around again.
pub async fn pump_local_announces(
    mut ingress: mpsc::Receiver<SwitchMessage>,
    lounge: Arc<SwitchLounge>,
    clients: Arc<LocalClientLounge>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = ingress.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        clients.add(msg.payload.to_client_info());
        if let Err(err) = lounge.write(msg) {
            tracing::debug!(error = %err, "dropped local announce");
        }
    }
}

/// Feed records received from peer links into the switch lounge.
pub async fn pump_peer_messages(
    mut peer_rx: mpsc::Receiver<SwitchMessage>,
    lounge: Arc<SwitchLounge>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = peer_rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        if let Err(err) = lounge.write(msg) {
            tracing::debug!(error = %err, "dropped peer discovery message");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
