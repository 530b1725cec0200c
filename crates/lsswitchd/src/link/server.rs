//! Inbound side of the peer link: accept loop with restart-on-failure.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lsswitch_core::cipher::PayloadCipher;
use lsswitch_core::config::{TCP_ACCEPT_TIMEOUT, TCP_SERVER_RESTART_INTERVAL};
use lsswitch_core::wire::SwitchMessage;
use lsswitch_services::ConnectionHub;

use super::handle_connection;

/// Accept peer connections on `serv_port` until shutdown.
///
/// A bind failure is a fatal configuration error; a dying accept loop is
/// transient and rebuilds the listener after a short pause.
pub async fn serve(
    serv_port: u16,
    hub: Arc<ConnectionHub>,
    recv_tx: mpsc::Sender<SwitchMessage>,
    cipher: Arc<PayloadCipher>,
    errors: mpsc::Sender<anyhow::Error>,
    cancel: CancellationToken,
) {
    loop {
        let listener = match TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, serv_port)).await
        {
            Ok(listener) => listener,
            Err(err) => {
                let _ = errors
                    .send(anyhow!(err).context(format!(
                        "failed to bind TCP server on port {serv_port}"
                    )))
                    .await;
                return;
            }
        };
        tracing::info!(port = serv_port, "TCP server listening");

        if !accept_loop(&listener, &hub, &recv_tx, &cipher, &cancel).await {
            tracing::debug!("TCP server exiting gracefully");
            return;
        }

        tracing::info!(
            interval_secs = TCP_SERVER_RESTART_INTERVAL.as_secs(),
            "restarting TCP server"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(TCP_SERVER_RESTART_INTERVAL) => {}
        }
    }
}

/// Returns true when the listener died and should be rebuilt, false on
/// shutdown.
async fn accept_loop(
    listener: &TcpListener,
    hub: &Arc<ConnectionHub>,
    recv_tx: &mpsc::Sender<SwitchMessage>,
    cipher: &Arc<PayloadCipher>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return false,
            accepted = timeout(TCP_ACCEPT_TIMEOUT, listener.accept()) => accepted,
        };
        let (stream, remote): (_, SocketAddr) = match accepted {
            Err(_) => continue, // rolling accept deadline
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "TCP accept failed");
                return true;
            }
        };

        let (outbound, conn_cancel) = match hub.add_connection(remote) {
            Ok(handles) => handles,
            Err(err) => {
                tracing::warn!(%remote, error = %err, "rejecting TCP connection");
                continue; // dropping the stream closes it
            }
        };
        tracing::info!(%remote, "accepted TCP connection");

        tokio::spawn(handle_connection(
            stream,
            remote,
            outbound,
            recv_tx.clone(),
            hub.clone(),
            cipher.clone(),
            conn_cancel,
        ));
    }
}
