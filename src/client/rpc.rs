//! RPC Transport and Call Discipline
//!
//! [`RpcTransport`] moves one request to one node. [`RpcClient`] wraps a
//! transport with the client's calling rules:
//!
//! - a single async lock held for the whole call, so at most one call is in
//!   flight per client;
//! - transport faults (connect, I/O, timeout, garbled reply) are retried up
//!   to a fixed cap with a fixed back-off, tearing down the node's pooled
//!   connection between attempts;
//! - a remote protocol error is never retried and is treated as fatal.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::{ClientError, TransportError};
use crate::config::{FatalPolicy, RetryPolicy};
use crate::fleet::types::Node;
use crate::service::protocol::{self, ENDPOINT_RPC, Reply, RpcRequest, RpcResponse};

#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, node: &Node, request: &RpcRequest) -> Result<RpcResponse, TransportError>;

    /// Drops any pooled connection state for `node`.
    async fn reset(&self, node: &Node);
}

/// HTTP transport with one pooled `reqwest::Client` per node.
pub struct HttpTransport {
    sessions: DashMap<Node, reqwest::Client>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    fn session(&self, node: &Node) -> reqwest::Client {
        self.sessions
            .entry(node.clone())
            .or_insert_with(|| {
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .unwrap_or_default()
            })
            .clone()
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Io(e.to_string())
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, node: &Node, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        let url = format!("{}{}", node.base_url(), ENDPOINT_RPC);
        let body = protocol::encode(request).map_err(|e| TransportError::Codec(e.to_string()))?;

        let response = self
            .session(node)
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Io(format!("HTTP {}", status)));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        protocol::decode::<RpcResponse>(&bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }

    async fn reset(&self, node: &Node) {
        self.sessions.remove(node);
    }
}

pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    call_lock: Mutex<()>,
    retry: RetryPolicy,
    fatal: FatalPolicy,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>, retry: RetryPolicy, fatal: FatalPolicy) -> Self {
        Self {
            transport,
            call_lock: Mutex::new(()),
            retry,
            fatal,
        }
    }

    pub async fn call(&self, node: &Node, request: &RpcRequest) -> Result<Reply, ClientError> {
        let _guard = self.call_lock.lock().await;
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.transport.send(node, request).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(error)) => {
                    tracing::error!(
                        "Protocol error from {} for {}: {}",
                        node,
                        request.method,
                        error
                    );
                    if self.fatal == FatalPolicy::Abort {
                        std::process::abort();
                    }
                    return Err(ClientError::Remote {
                        node: node.clone(),
                        error,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "{} to {} failed (attempt {}/{}): {}",
                        request.method,
                        node,
                        attempt,
                        attempts,
                        e
                    );
                    self.transport.reset(node).await;

                    if attempt >= attempts {
                        return Err(ClientError::Transport {
                            node: node.clone(),
                            source: e,
                        });
                    }
                    tokio::time::sleep(self.retry.backoff()).await;
                }
            }
        }
    }
}
