//! HTTP worker pool — bounded concurrency for LocalSend HTTP calls.
//!
//! The relay plane issues two kinds of requests: `GET /info` probes against
//! the local client and fire-and-forget `POST /register` calls against
//! remote clients. A fixed set of workers drains one shared queue; each
//! worker owns a client with certificate verification disabled (LocalSend
//! instances serve self-signed certificates) and a short overall timeout.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use lsswitch_core::config::{
    HTTP_CLIENT_WORKER_COUNT, HTTP_REQUEST_CHAN_SIZE, HTTP_REQUEST_TIMEOUT,
    HTTP_RESPONSE_BODY_MAX_SIZE,
};

/// What to send: a bare GET, or a POST carrying a JSON body.
#[derive(Debug)]
pub enum HttpRequestKind {
    Get,
    PostJson(Bytes),
}

/// One queued request. When `respond_to` is present the waiter receives
/// `Some(response)` on success and `None` on any transport failure, so it
/// can tell "HTTP failed" apart from "HTTP succeeded with a body".
#[derive(Debug)]
pub struct HttpRequest {
    pub url: String,
    pub kind: HttpRequestKind,
    pub respond_to: Option<oneshot::Sender<Option<HttpResponse>>>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Handle to the worker pool's request queue.
#[derive(Clone)]
pub struct HttpPool {
    tx: mpsc::Sender<HttpRequest>,
}

impl HttpPool {
    /// Build the clients and spawn the workers.
    pub fn spawn(shutdown: &CancellationToken) -> Result<Self, reqwest::Error> {
        let (tx, rx) = mpsc::channel(HTTP_REQUEST_CHAN_SIZE);
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..HTTP_CLIENT_WORKER_COUNT {
            let client = reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .timeout(HTTP_REQUEST_TIMEOUT)
                .build()?;
            tokio::spawn(worker(worker_id, client, rx.clone(), shutdown.child_token()));
        }
        Ok(Self { tx })
    }

    /// The producer side of the request queue.
    pub fn sender(&self) -> mpsc::Sender<HttpRequest> {
        self.tx.clone()
    }
}

async fn worker(
    worker_id: usize,
    client: reqwest::Client,
    queue: Arc<Mutex<mpsc::Receiver<HttpRequest>>>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => return,
            req = async { queue.lock().await.recv().await } => match req {
                Some(req) => req,
                None => return,
            },
        };

        let result = execute(&client, &request.url, request.kind).await;
        if result.is_none() {
            tracing::debug!(worker_id, url = %request.url, "http request failed");
        }
        if let Some(sink) = request.respond_to {
            let _ = sink.send(result);
        }
    }
}

/// Perform one request. `None` means the request failed in transport or
/// while reading the body; the body is capped, not rejected, when large.
async fn execute(
    client: &reqwest::Client,
    url: &str,
    kind: HttpRequestKind,
) -> Option<HttpResponse> {
    let sent = match kind {
        HttpRequestKind::Get => client.get(url).send().await,
        HttpRequestKind::PostJson(body) => {
            client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
        }
    };
    let mut response = match sent {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(url, error = %err, "http transport error");
            return None;
        }
    };

    let status = response.status().as_u16();
    if !response.status().is_success() {
        tracing::debug!(url, status, "non-success http response");
    }

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = HTTP_RESPONSE_BODY_MAX_SIZE - body.len();
                if chunk.len() >= room {
                    body.extend_from_slice(&chunk[..room]);
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(url, error = %err, "failed to read http response body");
                return None;
            }
        }
    }

    Some(HttpResponse {
        status,
        body: body.into(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
