//! Client-alive prober — keeps the local-client lounge fresh.
//!
//! LocalSend clients may serve their API over http or https depending on
//! their settings, so every round probes `/info` over both in parallel.
//! The `/info` response does not carry `port` or `protocol`; both are
//! filled from the probe itself, deliberately overwriting anything the
//! body might contain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use lsswitch_core::wire::LocalSendClientInfo;
use lsswitch_services::{HttpRequest, HttpRequestKind, HttpResponse, LocalClientLounge};

/// Probe the local LocalSend client every `interval` until shutdown.
pub async fn probe_loop(
    ls_port: u16,
    interval: Duration,
    http_tx: mpsc::Sender<HttpRequest>,
    clients: Arc<LocalClientLounge>,
    cancel: CancellationToken,
) {
    let first = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(first, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => probe_once(ls_port, &http_tx, &clients, &cancel).await,
        }
    }
}

async fn probe_once(
    ls_port: u16,
    http_tx: &mpsc::Sender<HttpRequest>,
    clients: &LocalClientLounge,
    cancel: &CancellationToken,
) {
    let (https, http) = tokio::join!(
        probe(http_tx, "https", ls_port, cancel),
        probe(http_tx, "http", ls_port, cancel),
    );
    // Both probes absent: no client is listening right now. The lounge
    // entry, if any, ages out on its own.
    let Some((protocol, response)) = select_probe(https, http) else {
        return;
    };
    let Some(info) = client_from_info_body(&response.body, protocol, ls_port) else {
        return;
    };
    tracing::debug!(port = ls_port, protocol, "local client is alive");
    clients.add(info);
}

/// Issue one `/info` probe and wait for its outcome. `None` covers both
/// transport failure and shutdown.
async fn probe(
    http_tx: &mpsc::Sender<HttpRequest>,
    scheme: &str,
    ls_port: u16,
    cancel: &CancellationToken,
) -> Option<HttpResponse> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = HttpRequest {
        url: format!("{scheme}://127.0.0.1:{ls_port}/api/localsend/v2/info"),
        kind: HttpRequestKind::Get,
        respond_to: Some(reply_tx),
    };
    tokio::select! {
        _ = cancel.cancelled() => return None,
        sent = http_tx.send(request) => sent.ok()?,
    }
    tokio::select! {
        _ = cancel.cancelled() => None,
        reply = reply_rx => reply.ok().flatten(),
    }
}

/// Prefer the https probe, fall back to http.
pub(crate) fn select_probe(
    https: Option<HttpResponse>,
    http: Option<HttpResponse>,
) -> Option<(&'static str, HttpResponse)> {
    match (https, http) {
        (Some(response), _) => Some(("https", response)),
        (None, Some(response)) => Some(("http", response)),
        (None, None) => None,
    }
}

/// Parse an `/info` body and normalise `port` and `protocol` to the probe
/// that produced it.
pub(crate) fn client_from_info_body(
    body: &[u8],
    protocol: &str,
    ls_port: u16,
) -> Option<LocalSendClientInfo> {
    let mut info: LocalSendClientInfo = match serde_json::from_slice(body) {
        Ok(info) => info,
        Err(err) => {
            tracing::debug!(error = %err, "unparseable /info response body");
            return None;
        }
    };
    info.port = ls_port;
    info.protocol = protocol.to_string();
    Some(info)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    #[test]
    fn https_is_preferred_over_http() {
        let picked = select_probe(Some(response("a")), Some(response("b"))).unwrap();
        assert_eq!(picked.0, "https");
        assert_eq!(&picked.1.body[..], b"a");
    }

    #[test]
    fn http_is_the_fallback() {
        let picked = select_probe(None, Some(response("b"))).unwrap();
        assert_eq!(picked.0, "http");
    }

    #[test]
    fn both_absent_means_inactive() {
        assert!(select_probe(None, None).is_none());
    }

    #[test]
    fn info_body_gets_port_and_protocol_from_the_probe() {
        // /info omits port and protocol entirely.
        let body = r#"{
            "alias": "laptop",
            "version": "2.0",
            "deviceModel": "ThinkPad",
            "deviceType": "desktop",
            "fingerprint": "f1",
            "download": true
        }"#;
        let info = client_from_info_body(body.as_bytes(), "http", 53317).unwrap();
        assert_eq!(info.alias, "laptop");
        assert_eq!(info.port, 53317);
        assert_eq!(info.protocol, "http");
    }

    #[test]
    fn info_body_values_are_overwritten_by_the_probe() {
        // Even when the endpoint does include them, the probe wins.
        let body = r#"{"alias":"laptop","port":9999,"protocol":"https"}"#;
        let info = client_from_info_body(body.as_bytes(), "http", 53317).unwrap();
        assert_eq!(info.port, 53317);
        assert_eq!(info.protocol, "http");
    }

    #[test]
    fn garbage_info_body_is_rejected() {
        assert!(client_from_info_body(b"not json", "http", 53317).is_none());
    }
}
