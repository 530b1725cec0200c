//! Outbound side of the peer link: dial the configured peer and keep the
//! connection alive, with a bounded retry budget.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lsswitch_core::cipher::PayloadCipher;
use lsswitch_core::config::PEER_CONNECT_RETRY_INTERVAL;
use lsswitch_core::wire::SwitchMessage;
use lsswitch_services::ConnectionHub;

use super::handle_connection;

/// Dial `peer_addr:peer_port` and run the connection handler until the
/// link drops, then retry after a pause.
///
/// A successful dial resets the retry counter. A negative `max_retries`
/// retries forever; otherwise exhausting the budget is fatal.
pub async fn maintain_peer(
    peer_addr: String,
    peer_port: u16,
    hub: Arc<ConnectionHub>,
    recv_tx: mpsc::Sender<SwitchMessage>,
    cipher: Arc<PayloadCipher>,
    max_retries: i32,
    errors: mpsc::Sender<anyhow::Error>,
    cancel: CancellationToken,
) {
    let mut retry_count: i32 = 0;
    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return,
            dialed = TcpStream::connect((peer_addr.as_str(), peer_port)) => dialed,
        };

        match dialed {
            Ok(stream) => {
                retry_count = 0;
                let remote = match stream.peer_addr() {
                    Ok(remote) => remote,
                    Err(err) => {
                        tracing::debug!(error = %err, "peer connection lost before setup");
                        continue;
                    }
                };
                let (outbound, conn_cancel) = match hub.add_connection(remote) {
                    Ok(handles) => handles,
                    Err(err) => {
                        tracing::warn!(%peer_addr, peer_port, error = %err, "failed to register peer connection");
                        return;
                    }
                };
                tracing::info!(%peer_addr, peer_port, "established TCP connection to peer switch");

                handle_connection(
                    stream,
                    remote,
                    outbound,
                    recv_tx.clone(),
                    hub.clone(),
                    cipher.clone(),
                    conn_cancel,
                )
                .await;

                if cancel.is_cancelled() {
                    tracing::debug!(%peer_addr, peer_port, "peer connection exiting gracefully");
                    return;
                }
                // Link dropped unexpectedly; fall through to retry.
            }
            Err(err) => {
                tracing::debug!(%peer_addr, peer_port, error = %err, "failed to dial peer switch");
            }
        }

        retry_count += 1;
        if max_retries >= 0 && retry_count > max_retries {
            let _ = errors
                .send(anyhow!(
                    "exceeded maximum retries ({max_retries}) connecting to peer switch at {peer_addr}:{peer_port}"
                ))
                .await;
            return;
        }
        if max_retries < 0 {
            tracing::info!(%peer_addr, peer_port, retry_count, max_retries = "unlimited", "retrying peer connection");
        } else {
            tracing::info!(%peer_addr, peer_port, retry_count, max_retries, "retrying peer connection");
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(PEER_CONNECT_RETRY_INTERVAL) => {}
        }
    }
}
