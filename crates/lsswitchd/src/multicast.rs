//! Multicast ingress — captures LocalSend announces emitted on this host.
//!
//! The listener joins the LocalSend group on the outbound interface and
//! admits only datagrams whose source IP is the host's own outbound IP:
//! this node's job is to hand *local* announces to its peers, and announces
//! from other hosts on the same subnet were already seen by those hosts'
//! own switchboards. Accepted announces are stamped with the node identity,
//! a fresh sequence number, and the full TTL budget.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use lsswitch_core::config::{
    MAX_DISCOVERY_TTL, MULTICAST_READ_BUFFER_SIZE, MULTICAST_READ_TIMEOUT,
    MULTICAST_RESTART_INTERVAL,
};
use lsswitch_core::wire::{next_discovery_seq, DiscoveryMessage, SwitchMessage};

/// Listen for LocalSend announce datagrams until shutdown.
///
/// Socket creation and group join failures are fatal and reported on the
/// error channel. A non-timeout read error rebuilds the whole listener
/// after a short pause.
pub async fn listen_announces(
    node_id: String,
    group: IpAddr,
    ls_port: u16,
    interface_name: String,
    self_ip: IpAddr,
    ingress: mpsc::Sender<SwitchMessage>,
    errors: mpsc::Sender<anyhow::Error>,
    cancel: CancellationToken,
) {
    loop {
        let socket = match join_group(group, ls_port, &interface_name, self_ip) {
            Ok(socket) => socket,
            Err(err) => {
                let _ = errors
                    .send(anyhow::Error::new(err).context(format!(
                        "failed to join multicast group {group}:{ls_port}"
                    )))
                    .await;
                return;
            }
        };
        let socket = match UdpSocket::from_std(socket) {
            Ok(socket) => socket,
            Err(err) => {
                let _ = errors
                    .send(anyhow::Error::new(err).context("failed to register multicast socket"))
                    .await;
                return;
            }
        };
        tracing::info!(%group, port = ls_port, "joined multicast group");

        if !read_loop(&socket, &node_id, self_ip, &ingress, &cancel).await {
            tracing::debug!("multicast listener exiting gracefully");
            return;
        }

        tracing::info!(
            interval_secs = MULTICAST_RESTART_INTERVAL.as_secs(),
            "restarting multicast listener"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(MULTICAST_RESTART_INTERVAL) => {}
        }
    }
}

/// Returns true when the socket died and the listener should be rebuilt,
/// false on shutdown.
async fn read_loop(
    socket: &UdpSocket,
    node_id: &str,
    self_ip: IpAddr,
    ingress: &mpsc::Sender<SwitchMessage>,
    cancel: &CancellationToken,
) -> bool {
    let mut buf = vec![0u8; MULTICAST_READ_BUFFER_SIZE];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return false,
            received = timeout(MULTICAST_READ_TIMEOUT, socket.recv_from(&mut buf)) => received,
        };
        let (len, remote) = match received {
            Err(_) => continue, // rolling read deadline
            Ok(Ok(datagram)) => datagram,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "multicast read failed");
                return true;
            }
        };

        let Some(msg) = lift_announce(&buf[..len], remote, self_ip, node_id) else {
            continue;
        };
        // Blocking send: the bounded ingress channel is the backpressure
        // point between the network and the relay plane.
        tokio::select! {
            _ = cancel.cancelled() => return false,
            sent = ingress.send(msg) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Parse, filter, and stamp one announce datagram.
///
/// Datagrams that are not valid announce JSON, or whose source IP is not
/// this host's outbound IP, produce nothing — and consume no sequence
/// number.
pub fn lift_announce(
    data: &[u8],
    remote: SocketAddr,
    self_ip: IpAddr,
    node_id: &str,
) -> Option<SwitchMessage> {
    let mut announce: DiscoveryMessage = match serde_json::from_slice(data) {
        Ok(announce) => announce,
        Err(err) => {
            tracing::debug!(%remote, error = %err, "ignoring unparseable announce");
            return None;
        }
    };
    if remote.ip() != self_ip {
        return None;
    }
    announce.switch_id = node_id.to_string();
    announce.discovery_seq = next_discovery_seq();
    announce.discovery_ttl = MAX_DISCOVERY_TTL;
    announce.original_addr = remote.ip().to_string();
    Some(SwitchMessage {
        source_addr: Some(remote),
        payload: announce,
    })
}

/// Build the UDP socket, bound to the wildcard address with `SO_REUSEADDR`
/// so it can share the LocalSend port with the local client, and joined to
/// the group on the outbound interface.
fn join_group(
    group: IpAddr,
    port: u16,
    interface_name: &str,
    self_ip: IpAddr,
) -> io::Result<std::net::UdpSocket> {
    match group {
        IpAddr::V4(group) => {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
            socket.bind(&bind_addr.into())?;
            let local = match self_ip {
                IpAddr::V4(addr) => addr,
                IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
            };
            socket.join_multicast_v4(&group, &local)?;
            Ok(socket.into())
        }
        IpAddr::V6(group) => {
            let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_reuse_address(true)?;
            socket.set_only_v6(true)?;
            socket.set_nonblocking(true)?;
            let bind_addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
            socket.bind(&bind_addr.into())?;
            let index = lsswitch_core::net::interface_index(interface_name)?;
            socket.join_multicast_v6(&group, index)?;
            Ok(socket.into())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
