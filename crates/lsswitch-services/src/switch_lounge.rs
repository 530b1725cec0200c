//! Switch lounge — where discovery records wait to be forwarded.
//!
//! Records from the multicast listener and every peer link funnel in here.
//! A dedup index keyed by `(switch_id, discovery_seq)` guarantees each
//! unique announce is enqueued at most once within its lifetime, which is
//! what keeps a cyclic relay topology from flooding itself. Expirations
//! live in a min-heap so the reaper never scans the whole index.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lsswitch_core::config::{
    DEDUP_CACHE_LIFETIME, DEDUP_CACHE_MAX_ENTRIES, LOUNGE_REAP_INTERVAL, SWITCH_LOUNGE_SIZE,
};
use lsswitch_core::wire::SwitchMessage;

/// A dedup index entry's expiration. Min-ordered by time via `Reverse`.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ExpiringId {
    expire_at: Instant,
    id: String,
}

struct DedupState {
    seen: HashSet<String>,
    expirations: BinaryHeap<Reverse<ExpiringId>>,
    closed: bool,
}

/// Bounded queue of messages awaiting forward, with a TTL-reaped dedup index.
pub struct SwitchLounge {
    tx: mpsc::Sender<SwitchMessage>,
    state: Mutex<DedupState>,
    cancel: CancellationToken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoungeError {
    #[error("switch lounge is closed")]
    Closed,

    #[error("switch lounge is full")]
    Full,

    #[error("switch lounge dedup cache is full")]
    DedupCacheFull,
}

impl SwitchLounge {
    /// Create the lounge and hand back the single consumer side of its
    /// queue. Spawns the reaper; must run inside a tokio runtime.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<SwitchMessage>) {
        let (tx, rx) = mpsc::channel(SWITCH_LOUNGE_SIZE);
        let lounge = Arc::new(Self {
            tx,
            state: Mutex::new(DedupState {
                seen: HashSet::new(),
                expirations: BinaryHeap::new(),
                closed: false,
            }),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(reaper(Arc::downgrade(&lounge), lounge.cancel.clone()));
        (lounge, rx)
    }

    /// Enqueue a record for forwarding.
    ///
    /// A record whose discovery id was already admitted within the dedup
    /// lifetime is silently accepted and not enqueued again. The enqueue
    /// itself never blocks: a full queue drops the record with
    /// [`LoungeError::Full`], so a slow forwarder cannot stall ingress.
    pub fn write(&self, msg: SwitchMessage) -> Result<(), LoungeError> {
        let id = msg.payload.discovery_id();
        let mut state = self.state.lock().expect("lounge mutex poisoned");
        if state.closed {
            return Err(LoungeError::Closed);
        }
        if state.seen.contains(&id) {
            return Ok(());
        }
        if state.seen.len() >= DEDUP_CACHE_MAX_ENTRIES {
            return Err(LoungeError::DedupCacheFull);
        }
        match self.tx.try_send(msg) {
            Ok(()) => {
                state.seen.insert(id.clone());
                state.expirations.push(Reverse(ExpiringId {
                    expire_at: Instant::now() + DEDUP_CACHE_LIFETIME,
                    id,
                }));
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(LoungeError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LoungeError::Closed),
        }
    }

    /// Stop accepting writes and wake the reaper for the last time.
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("lounge mutex poisoned");
        if state.closed {
            return;
        }
        state.closed = true;
        self.cancel.cancel();
    }

    fn reap(&self, now: Instant) {
        let mut state = self.state.lock().expect("lounge mutex poisoned");
        while let Some(Reverse(top)) = state.expirations.peek() {
            if top.expire_at > now {
                break;
            }
            let Some(Reverse(expired)) = state.expirations.pop() else {
                break;
            };
            state.seen.remove(&expired.id);
        }
    }
}

/// Periodically drops expired ids from the dedup index. Holds only a weak
/// reference — the close signal or the lounge being dropped ends the task.
async fn reaper(lounge: Weak<SwitchLounge>, cancel: CancellationToken) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use lsswitch_core::wire::DiscoveryMessage;
    use std::time::Duration;

    fn msg(switch_id: &str, seq: u64) -> SwitchMessage {
        SwitchMessage {
            source_addr: Some("10.0.0.9:7000".parse().unwrap()),
            payload: DiscoveryMessage {
                switch_id: switch_id.into(),
                discovery_seq: seq,
                discovery_ttl: 255,
                alias: "laptop".into(),
                port: 53317,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn duplicate_write_enqueues_once() {
        let (lounge, mut rx) = SwitchLounge::new();
        lounge.write(msg("node-a", 1)).unwrap();
        // The duplicate is accepted silently, not an error.
        lounge.write(msg("node-a", 1)).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn distinct_ids_all_enqueue() {
        let (lounge, mut rx) = SwitchLounge::new();
        lounge.write(msg("node-a", 1)).unwrap();
        lounge.write(msg("node-a", 2)).unwrap();
        lounge.write(msg("node-b", 1)).unwrap();
        for _ in 0..3 {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn closed_lounge_rejects_writes() {
        let (lounge, _rx) = SwitchLounge::new();
        lounge.close();
        lounge.close(); // idempotent
        assert_eq!(lounge.write(msg("node-a", 1)), Err(LoungeError::Closed));
    }

    #[tokio::test]
    async fn full_queue_drops_with_error() {
        let (lounge, _rx) = SwitchLounge::new();
        for seq in 0..SWITCH_LOUNGE_SIZE as u64 {
            lounge.write(msg("node-a", seq)).unwrap();
        }
        assert_eq!(
            lounge.write(msg("node-a", SWITCH_LOUNGE_SIZE as u64)),
            Err(LoungeError::Full)
        );
    }

    #[tokio::test]
    async fn dedup_cache_cap_is_enforced() {
        let (lounge, mut rx) = SwitchLounge::new();
        // Drain as we go so the queue never fills before the index does.
        for seq in 0..DEDUP_CACHE_MAX_ENTRIES as u64 {
            lounge.write(msg("node-a", seq)).unwrap();
            rx.recv().await.unwrap();
        }
        assert_eq!(
            lounge.write(msg("node-a", DEDUP_CACHE_MAX_ENTRIES as u64)),
            Err(LoungeError::DedupCacheFull)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_id_can_be_enqueued_again() {
        let (lounge, mut rx) = SwitchLounge::new();
        lounge.write(msg("node-a", 1)).unwrap();
        assert!(rx.try_recv().is_ok());

        // Still within the dedup lifetime: silently dropped.
        lounge.write(msg("node-a", 1)).unwrap();
        assert!(rx.try_recv().is_err());

        // Let the entry expire and the reaper run.
        tokio::time::sleep(DEDUP_CACHE_LIFETIME + Duration::from_secs(11)).await;

        lounge.write(msg("node-a", 1)).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
