//! Per-connection receive and send loops.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lsswitch_core::cipher::PayloadCipher;
use lsswitch_core::config::{
    TCP_HEARTBEAT_INTERVAL, TCP_HEARTBEAT_SEND_INTERVAL, TCP_READ_BUFFER_SIZE, TCP_WRITE_TIMEOUT,
};
use lsswitch_core::wire::{self, DiscoveryMessage, SwitchMessage};
use lsswitch_services::ConnectionHub;

/// Run both halves of an established peer link until either terminates,
/// then tear the whole connection down and deregister it from the hub.
pub async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    outbound: mpsc::Receiver<SwitchMessage>,
    recv_tx: mpsc::Sender<SwitchMessage>,
    hub: Arc<ConnectionHub>,
    cipher: Arc<PayloadCipher>,
    cancel: CancellationToken,
) {
    if let Err(err) = enable_keepalive(&stream) {
        tracing::debug!(%remote, error = %err, "failed to enable TCP keepalive");
    }
    let (reader, writer) = stream.into_split();

    let recv = {
        let cancel = cancel.clone();
        let cipher = cipher.clone();
        tokio::spawn(async move {
            recv_loop(reader, remote, recv_tx, cipher, cancel.clone()).await;
            // A dead receive half means the link is gone for sending too.
            cancel.cancel();
        })
    };

    send_loop(writer, remote, outbound, cipher, cancel.clone()).await;
    cancel.cancel();
    let _ = recv.await;

    hub.remove_connection(&remote);
    tracing::debug!(%remote, "peer link closed");
}

/// Drain frames off the socket and hand decoded discovery records to the
/// relay plane. Any I/O, decrypt, or decode failure ends the loop — and
/// with it the connection.
pub(crate) async fn recv_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    remote: SocketAddr,
    recv_tx: mpsc::Sender<SwitchMessage>,
    cipher: Arc<PayloadCipher>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = timeout(TCP_HEARTBEAT_INTERVAL, read_frame(&mut reader)) => frame,
        };
        let payload = match frame {
            // No frame within the heartbeat window: the peer is gone.
            Err(_) => {
                tracing::debug!(%remote, "peer link went silent, dropping connection");
                return;
            }
            Ok(Err(err)) => {
                tracing::debug!(%remote, error = %err, "peer link read failed");
                return;
            }
            Ok(Ok(None)) => continue, // heartbeat
            Ok(Ok(Some(payload))) => payload,
        };

        let payload = match cipher.decrypt(&payload) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(%remote, error = %err, "failed to decrypt discovery message, corrupted or wrong secret");
                return;
            }
        };
        let message = match DiscoveryMessage::decode(payload.as_slice()) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%remote, error = %err, "failed to decode discovery message, corrupted or invalid");
                return;
            }
        };

        let msg = SwitchMessage {
            source_addr: Some(remote),
            payload: message,
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = recv_tx.send(msg) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Read one frame. `Ok(None)` is a heartbeat, `Ok(Some(payload))` a
/// discovery payload still in its (possibly encrypted) wire form.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let tag = reader.read_u8().await?;
    match tag {
        wire::TAG_HEARTBEAT => Ok(None),
        wire::TAG_DISCOVERY => {
            let length = reader.read_u32().await?;
            if length as usize > TCP_READ_BUFFER_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame length {length} exceeds read buffer"),
                ));
            }
            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload).await?;
            Ok(Some(payload))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame tag 0x{other:02X}"),
        )),
    }
}

/// Drain the outbound queue onto the socket, interleaving heartbeats.
///
/// A failed serialisation or encryption skips that message; a write
/// timeout is logged and the link kept; only a dead socket (or shutdown,
/// or the hub closing the queue) ends the loop.
pub(crate) async fn send_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    remote: SocketAddr,
    mut outbound: mpsc::Receiver<SwitchMessage>,
    cipher: Arc<PayloadCipher>,
    cancel: CancellationToken,
) {
    let first_beat = tokio::time::Instant::now() + TCP_HEARTBEAT_SEND_INTERVAL;
    let mut heartbeat = tokio::time::interval_at(first_beat, TCP_HEARTBEAT_SEND_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = heartbeat.tick() => {
                match write_with_deadline(&mut writer, &[wire::TAG_HEARTBEAT]).await {
                    Ok(()) => {}
                    Err(err) if is_link_dead(&err) => return,
                    Err(err) => {
                        tracing::debug!(%remote, error = %err, "failed to send heartbeat");
                    }
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else { return };
                let payload = msg.payload.encode_to_vec();
                let payload = match cipher.encrypt(&payload) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::error!(%remote, error = %err, "failed to encrypt discovery message, skipping");
                        continue;
                    }
                };
                let frame = wire::encode_discovery_frame(&payload);
                match write_with_deadline(&mut writer, &frame).await {
                    Ok(()) => {}
                    Err(err) if is_link_dead(&err) => return,
                    Err(err) => {
                        tracing::debug!(%remote, error = %err, "failed to send discovery frame");
                    }
                }
            }
        }
    }
}

async fn write_with_deadline<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    match timeout(TCP_WRITE_TIMEOUT, async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "write deadline exceeded",
        )),
    }
}

fn is_link_dead(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    let keepalive = socket2::TcpKeepalive::new().with_time(TCP_HEARTBEAT_INTERVAL);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
