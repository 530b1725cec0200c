//! Local-client lounge — the LocalSend clients observed on this host.
//!
//! Keyed by port, the only value guaranteed unique per host per client.
//! In practice there is exactly one local client; the map exists so a
//! second instance on another port just works.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lsswitch_core::config::LOUNGE_REAP_INTERVAL;
use lsswitch_core::wire::LocalSendClientInfo;

struct CachedClient {
    info: LocalSendClientInfo,
    expire_at: Instant,
}

struct State {
    clients: HashMap<u16, CachedClient>,
    closed: bool,
}

/// TTL-indexed registry of local LocalSend clients.
pub struct LocalClientLounge {
    state: Mutex<State>,
    lifetime: Duration,
    cancel: CancellationToken,
}

impl LocalClientLounge {
    /// Create the lounge and spawn its reaper; must run inside a tokio
    /// runtime. `lifetime` should exceed the aliveness probe interval so a
    /// single missed probe does not evict a client.
    pub fn new(lifetime: Duration) -> Arc<Self> {
        let lounge = Arc::new(Self {
            state: Mutex::new(State {
                clients: HashMap::new(),
                closed: false,
            }),
            lifetime,
            cancel: CancellationToken::new(),
        });
        tokio::spawn(reaper(Arc::downgrade(&lounge), lounge.cancel.clone()));
        lounge
    }

    /// Insert or refresh a client. Overwrites the entry at the client's
    /// port and restarts its lifetime.
    pub fn add(&self, info: LocalSendClientInfo) {
        let mut state = self.state.lock().expect("client lounge mutex poisoned");
        if state.closed {
            return;
        }
        let expire_at = Instant::now() + self.lifetime;
        state.clients.insert(info.port, CachedClient { info, expire_at });
    }

    /// Current set of live clients. The local client count is effectively
    /// one, so a copied snapshot is cheap.
    pub fn snapshot(&self) -> Vec<LocalSendClientInfo> {
        let state = self.state.lock().expect("client lounge mutex poisoned");
        state.clients.values().map(|c| c.info.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().expect("client lounge mutex poisoned");
        state.clients.is_empty()
    }

    /// Stop the reaper and refuse further inserts. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("client lounge mutex poisoned");
        if state.closed {
            return;
        }
        state.closed = true;
        self.cancel.cancel();
    }

    fn reap(&self, now: Instant) {
        let mut state = self.state.lock().expect("client lounge mutex poisoned");
        state.clients.retain(|_, c| c.expire_at > now);
    }
}

/// The handful of local clients fits a linear sweep; no heap needed here.
async fn reaper(lounge: Weak<LocalClientLounge>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(LOUNGE_REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let Some(lounge) = lounge.upgrade() else { return };
                lounge.reap(Instant::now());
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
