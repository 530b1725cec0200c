//! Host network glue: outbound-IP detection, interface selection, node ids.

use std::io;
use std::net::{IpAddr, UdpSocket};

use rand::RngCore;

/// Alphabet for switch node ids.
const ID_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Mint a random 16-character node id.
///
/// Bytes come from the thread-local CSPRNG and are folded into the
/// alphanumeric alphabet by modulo. Produced once at startup.
pub fn generate_switch_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ID_LETTERS[usize::from(*b) % ID_LETTERS.len()] as char)
        .collect()
}

/// The host's preferred outbound IP — the one a default route would use,
/// rather than a Docker bridge or loopback.
///
/// Connecting a UDP socket selects a local address without sending a
/// single packet; the socket is dropped immediately.
pub fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

/// Find the network interface that owns `ip`.
pub fn interface_for_ip(ip: IpAddr) -> io::Result<Option<get_if_addrs::Interface>> {
    let interfaces = get_if_addrs::get_if_addrs()?;
    Ok(interfaces.into_iter().find(|iface| iface.ip() == ip))
}

/// OS interface index for a named interface; needed for IPv6 group joins.
pub fn interface_index(name: &str) -> io::Result<u32> {
    let name_cstr = std::ffi::CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("interface '{name}' not found"),
        ));
    }
    Ok(index)
}
