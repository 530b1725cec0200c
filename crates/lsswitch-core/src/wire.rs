//! Switchboard wire format — the discovery record and its two encodings.
//!
//! The same record crosses two boundaries: LocalSend clients announce it as
//! JSON over UDP multicast (camelCase keys, extra fields allowed), and
//! switchboard peers exchange it as a length-delimited protobuf message over
//! TCP. The struct below carries both encodings: prost field attributes for
//! the peer link, serde attributes for the announce side.
//!
//! Changing a prost tag here is a breaking change for every deployed peer.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ── Discovery record ──────────────────────────────────────────────────────────

/// One LocalSend announce as it travels the relay plane.
///
/// The first four fields are switchboard routing metadata stamped by the
/// ingress node; the rest are the LocalSend application fields copied from
/// the announce verbatim. A LocalSend announce parsed from JSON leaves the
/// routing fields at their defaults until the listener stamps them.
#[derive(Clone, PartialEq, prost::Message, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryMessage {
    /// 16-char alphanumeric id of the node that lifted this announce.
    #[prost(string, tag = "1")]
    pub switch_id: String,

    /// Per-node monotonic sequence number. `(switch_id, discovery_seq)`
    /// is unique across the node's lifetime.
    #[prost(uint64, tag = "2")]
    pub discovery_seq: u64,

    /// Remaining hop budget. Semantically a byte: starts at 255, decremented
    /// on every fan-out target.
    #[prost(uint32, tag = "3")]
    pub discovery_ttl: u32,

    /// Textual IP of the LocalSend client that first emitted the announce.
    /// Distinct from the link the record arrived on.
    #[prost(string, tag = "4")]
    pub original_addr: String,

    #[prost(string, tag = "5")]
    pub alias: String,

    #[prost(string, tag = "6")]
    pub version: String,

    #[prost(string, tag = "7")]
    pub device_model: String,

    #[prost(string, tag = "8")]
    pub device_type: String,

    #[prost(string, tag = "9")]
    pub fingerprint: String,

    /// Carried as i32 on the wire; semantically a u16 TCP/HTTP port.
    #[prost(int32, tag = "10")]
    pub port: i32,

    /// `"http"` or `"https"`.
    #[prost(string, tag = "11")]
    pub protocol: String,

    #[prost(bool, tag = "12")]
    pub download: bool,
}

impl DiscoveryMessage {
    /// Dedup key: two records with the same id are the same logical announce.
    pub fn discovery_id(&self) -> String {
        format!("{}_{}", self.switch_id, self.discovery_seq)
    }

    /// Project the LocalSend application fields into a client-info record.
    pub fn to_client_info(&self) -> LocalSendClientInfo {
        LocalSendClientInfo {
            alias: self.alias.clone(),
            version: self.version.clone(),
            device_model: self.device_model.clone(),
            device_type: self.device_type.clone(),
            fingerprint: self.fingerprint.clone(),
            port: self.port as u16,
            protocol: self.protocol.clone(),
            download: self.download,
        }
    }
}

// ── In-process envelope ───────────────────────────────────────────────────────

/// A discovery record plus the link it arrived on.
///
/// `source_addr` is the peer's remote address for TCP and the UDP remote for
/// multicast — the link of origin, used for loop suppression. It is `None`
/// for records synthesised by the proactive broadcaster.
#[derive(Debug, Clone)]
pub struct SwitchMessage {
    pub source_addr: Option<SocketAddr>,
    pub payload: DiscoveryMessage,
}

// ── Local client info ─────────────────────────────────────────────────────────

/// Cached view of a LocalSend client running on this host.
///
/// Serialised as the body of `/register` calls and parsed from `/info`
/// responses; both use LocalSend's camelCase JSON. `/info` omits `port` and
/// `protocol`, so the prober fills them in after parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalSendClientInfo {
    pub alias: String,
    pub version: String,
    pub device_model: String,
    pub device_type: String,
    pub fingerprint: String,
    pub port: u16,
    pub protocol: String,
    pub download: bool,
}

impl LocalSendClientInfo {
    /// Build a fresh announce for this client, stamped with this node's
    /// identity and a new sequence number. TTL starts at the maximum.
    pub fn to_discovery(&self, switch_id: &str, discovery_seq: u64, self_ip: IpAddr) -> DiscoveryMessage {
        DiscoveryMessage {
            switch_id: switch_id.to_string(),
            discovery_seq,
            discovery_ttl: crate::config::MAX_DISCOVERY_TTL,
            original_addr: self_ip.to_string(),
            alias: self.alias.clone(),
            version: self.version.clone(),
            device_model: self.device_model.clone(),
            device_type: self.device_type.clone(),
            fingerprint: self.fingerprint.clone(),
            port: i32::from(self.port),
            protocol: self.protocol.clone(),
            download: self.download,
        }
    }
}

// ── Sequence counter ──────────────────────────────────────────────────────────

static DISCOVERY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Claim the next process-wide discovery sequence number. Starts at 0.
pub fn next_discovery_seq() -> u64 {
    DISCOVERY_SEQ.fetch_add(1, Ordering::Relaxed)
}

// ── TCP framing ───────────────────────────────────────────────────────────────

/// Frame tag: a length-prefixed, possibly encrypted `DiscoveryMessage`.
pub const TAG_DISCOVERY: u8 = 0x01;
/// Frame tag: heartbeat. No length, no body.
pub const TAG_HEARTBEAT: u8 = 0x02;

/// Assemble a discovery frame: `tag || u32 big-endian length || payload`.
/// The payload is already serialised (and encrypted when a secret is set).
pub fn encode_discovery_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(TAG_DISCOVERY);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

// ── Tests ─────────────────────────────────────────────────────────────────────
