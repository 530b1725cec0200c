//! Protocol constants and runtime settings.
//!
//! The constants are part of the relay plane's observable behaviour — the
//! queue bounds, deadlines and retry cadences documented for operators.
//! `SwitchSettings` carries the handful of values the CLI can change.

use std::time::Duration;

/// Grace period after signalling shutdown before the process exits, giving
/// every task a chance to wind down.
pub const SHUTDOWN_WIND_DOWN: Duration = Duration::from_secs(2);

// ── LocalSend defaults ────────────────────────────────────────────────────────

/// LocalSend's well-known IPv4 multicast group.
pub const LOCALSEND_DEFAULT_MULTICAST_V4: &str = "224.0.0.167";
/// LocalSend's well-known multicast / HTTP port.
pub const LOCALSEND_DEFAULT_PORT: u16 = 53317;

// ── Multicast ingress ─────────────────────────────────────────────────────────

/// Datagram read buffer. A LocalSend announce is far smaller.
pub const MULTICAST_READ_BUFFER_SIZE: usize = 64 * 1024;
/// Rolling read deadline; on expiry the listener just loops.
pub const MULTICAST_READ_TIMEOUT: Duration = Duration::from_secs(15);
/// Capacity of the ingress channel feeding the switch lounge.
pub const MULTICAST_CHAN_SIZE: usize = 128;
/// Backoff before rebuilding the listener after a non-timeout read error.
pub const MULTICAST_RESTART_INTERVAL: Duration = Duration::from_secs(3);

// ── TCP peer link ─────────────────────────────────────────────────────────────

/// Hard cap on tracked peer connections.
pub const MAX_TCP_CONNECTIONS: usize = 255 * 255;
/// Rolling accept deadline so the server loop can observe shutdown.
pub const TCP_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
/// A link with no inbound frame for this long is considered dead.
pub const TCP_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Cadence of outbound heartbeat frames; well under the read deadline.
pub const TCP_HEARTBEAT_SEND_INTERVAL: Duration = Duration::from_secs(8);
/// Backoff before rebinding the TCP server after a listener failure.
pub const TCP_SERVER_RESTART_INTERVAL: Duration = Duration::from_secs(3);
/// Upper bound on a single frame payload. Larger lengths drop the link.
pub const TCP_READ_BUFFER_SIZE: usize = 1024 * 1024;
/// Capacity of the shared channel carrying peer-received records.
pub const SWITCH_DATA_CHAN_SIZE: usize = 128;
/// Per-connection outbound queue capacity.
pub const TCP_SEND_CHAN_SIZE: usize = 32;
/// Deadline for each frame write.
pub const TCP_WRITE_TIMEOUT: Duration = Duration::from_secs(3);
/// Pause between peer dial attempts.
pub const PEER_CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
/// Default dial retry budget. Negative means retry forever.
pub const DEFAULT_PEER_CONNECT_MAX_RETRIES: i32 = 10;

// ── Relay plane ───────────────────────────────────────────────────────────────

/// Initial hop budget stamped on every lifted announce.
pub const MAX_DISCOVERY_TTL: u32 = 255;
/// How long a forwarded discovery id stays in the dedup index.
pub const DEDUP_CACHE_LIFETIME: Duration = Duration::from_secs(300);
/// Hard cap on dedup index entries.
pub const DEDUP_CACHE_MAX_ENTRIES: usize = 65536;
/// Switch lounge queue capacity; overflow is dropped.
pub const SWITCH_LOUNGE_SIZE: usize = 255 * 255;
/// Cadence of both lounge reapers.
pub const LOUNGE_REAP_INTERVAL: Duration = Duration::from_secs(10);

// ── HTTP client ───────────────────────────────────────────────────────────────

/// Total per-request timeout, connect included.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Cap on bytes read from a response body.
pub const HTTP_RESPONSE_BODY_MAX_SIZE: usize = 1024 * 1024;
/// Fixed worker count of the HTTP pool.
pub const HTTP_CLIENT_WORKER_COUNT: usize = 8;
/// Capacity of the shared HTTP request queue.
pub const HTTP_REQUEST_CHAN_SIZE: usize = 128;

// ── Local clients ─────────────────────────────────────────────────────────────

/// Default seconds between proactive broadcasts of local clients.
pub const DEFAULT_CLIENT_BROADCAST_INTERVAL_SECS: u32 = 15;
/// Default seconds between local-client aliveness probes.
pub const DEFAULT_CLIENT_ALIVE_CHECK_INTERVAL_SECS: u32 = 10;
/// Floor on the local-client cache lifetime.
pub const LOCAL_CLIENT_CACHE_LIFETIME: Duration = Duration::from_secs(60);

// ── Runtime settings ──────────────────────────────────────────────────────────

/// The CLI-tunable knobs, normalised once at startup.
#[derive(Debug, Clone)]
pub struct SwitchSettings {
    pub client_broadcast_interval: Duration,
    pub client_alive_check_interval: Duration,
    /// At least one missed probe must not evict a client, so this is
    /// `max(60 s, alive_check_interval + 10 s)`.
    pub client_cache_lifetime: Duration,
    /// Negative means retry forever.
    pub peer_connect_max_retries: i32,
}

impl SwitchSettings {
    pub fn new(broadcast_secs: u32, alive_check_secs: u32, peer_connect_max_retries: i32) -> Self {
        let alive = Duration::from_secs(u64::from(alive_check_secs));
        Self {
            client_broadcast_interval: Duration::from_secs(u64::from(broadcast_secs)),
            client_alive_check_interval: alive,
            client_cache_lifetime: LOCAL_CLIENT_CACHE_LIFETIME.max(alive + Duration::from_secs(10)),
            peer_connect_max_retries,
        }
    }
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_CLIENT_BROADCAST_INTERVAL_SECS,
            DEFAULT_CLIENT_ALIVE_CHECK_INTERVAL_SECS,
            DEFAULT_PEER_CONNECT_MAX_RETRIES,
        )
    }
}
