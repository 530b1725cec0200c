//! TCP peer link — the framed transport between switchboard nodes.
//!
//! Wire format per frame: `tag(1) || length(4, big-endian) || payload`.
//! Tag `0x01` carries a serialized (and, with a secret, encrypted)
//! `DiscoveryMessage`; tag `0x02` is a bare heartbeat. Anything else is
//! fatal to the connection. Application heartbeats ride on top of TCP
//! keepalive so a dead peer is noticed within one read deadline.

mod conn;
mod dialer;
mod server;

pub use conn::handle_connection;
pub use dialer::maintain_peer;
pub use server::serve;
