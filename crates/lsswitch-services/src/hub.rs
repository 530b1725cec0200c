//! Connection hub — the registry of live peer links.
//!
//! Each link is tracked under its remote endpoint string `"host:port"` and
//! owns a bounded outbound queue plus a cancellation token. The hub never
//! touches a socket itself: cancelling a link's token makes its handler
//! drop the socket and call back into [`ConnectionHub::remove_connection`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lsswitch_core::config::{MAX_TCP_CONNECTIONS, TCP_SEND_CHAN_SIZE};
use lsswitch_core::wire::SwitchMessage;

/// A peer link as seen by producers: where it goes, how to enqueue to it,
/// and how to tear it down.
#[derive(Debug, Clone)]
pub struct ConnWithChan {
    pub remote: SocketAddr,
    pub sender: mpsc::Sender<SwitchMessage>,
    pub cancel: CancellationToken,
}

/// Registry of live peer links keyed by remote endpoint string.
pub struct ConnectionHub {
    cancel: CancellationToken,
    conns: Mutex<HashMap<String, ConnWithChan>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("connection already exists")]
    AlreadyExists,

    #[error("maximum TCP connections reached")]
    MaxConnectionsReached,
}

impl ConnectionHub {
    /// Create a hub whose per-link tokens are children of `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cancel: shutdown,
            conns: Mutex::new(HashMap::new()),
        })
    }

    /// Register a link and create its outbound queue.
    ///
    /// Returns the consumer side of the queue and the link's cancellation
    /// token, both handed to the connection handler.
    pub fn add_connection(
        &self,
        remote: SocketAddr,
    ) -> Result<(mpsc::Receiver<SwitchMessage>, CancellationToken), HubError> {
        let key = remote.to_string();
        let mut conns = self.conns.lock().expect("hub mutex poisoned");
        if conns.contains_key(&key) {
            return Err(HubError::AlreadyExists);
        }
        if conns.len() >= MAX_TCP_CONNECTIONS {
            return Err(HubError::MaxConnectionsReached);
        }
        let (sender, receiver) = mpsc::channel(TCP_SEND_CHAN_SIZE);
        let cancel = self.cancel.child_token();
        conns.insert(
            key,
            ConnWithChan {
                remote,
                sender,
                cancel: cancel.clone(),
            },
        );
        Ok((receiver, cancel))
    }

    /// Drop a link: cancel its token (the handler closes the socket) and
    /// release its outbound queue. Idempotent.
    pub fn remove_connection(&self, remote: &SocketAddr) {
        let removed = {
            let mut conns = self.conns.lock().expect("hub mutex poisoned");
            conns.remove(&remote.to_string())
        };
        if let Some(conn) = removed {
            conn.cancel.cancel();
        }
    }

    /// Snapshot of every link except the one at `origin`, the fan-out set
    /// for a message that arrived on that link.
    pub fn connections_except(&self, origin: Option<&str>) -> Vec<ConnWithChan> {
        let conns = self.conns.lock().expect("hub mutex poisoned");
        conns
            .iter()
            .filter(|(key, _)| origin != Some(key.as_str()))
            .map(|(_, conn)| conn.clone())
            .collect()
    }

    /// Snapshot of every link.
    pub fn all_connections(&self) -> Vec<ConnWithChan> {
        let conns = self.conns.lock().expect("hub mutex poisoned");
        conns.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.conns.lock().expect("hub mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every link. Handlers observe their tokens and self-remove.
    pub fn close(&self) {
        let conns = self.conns.lock().expect("hub mutex poisoned");
        for conn in conns.values() {
            conn.cancel.cancel();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        let hub = ConnectionHub::new(CancellationToken::new());
        hub.add_connection(addr(7000)).unwrap();
        assert_eq!(
            hub.add_connection(addr(7000)).unwrap_err(),
            HubError::AlreadyExists
        );
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn remove_is_idempotent_and_cancels() {
        let hub = ConnectionHub::new(CancellationToken::new());
        let (_rx, cancel) = hub.add_connection(addr(7000)).unwrap();
        hub.remove_connection(&addr(7000));
        assert!(cancel.is_cancelled());
        assert!(hub.is_empty());
        hub.remove_connection(&addr(7000));
        assert!(hub.is_empty());
    }

    #[test]
    fn snapshot_excludes_origin_link() {
        let hub = ConnectionHub::new(CancellationToken::new());
        hub.add_connection(addr(7000)).unwrap();
        hub.add_connection(addr(7001)).unwrap();
        hub.add_connection(addr(7002)).unwrap();

        let origin = addr(7001).to_string();
        let except = hub.connections_except(Some(origin.as_str()));
        assert_eq!(except.len(), 2);
        assert!(except.iter().all(|c| c.remote != addr(7001)));

        assert_eq!(hub.connections_except(None).len(), 3);
        assert_eq!(hub.all_connections().len(), 3);
    }

    #[test]
    fn close_cancels_every_link() {
        let hub = ConnectionHub::new(CancellationToken::new());
        let (_rx1, c1) = hub.add_connection(addr(7000)).unwrap();
        let (_rx2, c2) = hub.add_connection(addr(7001)).unwrap();
        hub.close();
        assert!(c1.is_cancelled());
        assert!(c2.is_cancelled());
    }

    #[test]
    fn shutdown_token_cancels_link_tokens() {
        let shutdown = CancellationToken::new();
        let hub = ConnectionHub::new(shutdown.clone());
        let (_rx, cancel) = hub.add_connection(addr(7000)).unwrap();
        shutdown.cancel();
        assert!(cancel.is_cancelled());
    }
}
