// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// A JSON-RPC 2.0 client over HTTP POST to a single member's `/mcp`
/// endpoint, with a monotonic id counter and per-call timeout (spec §4.C).
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let call = self
            .http
            .post(format!("{}/mcp", self.base_url))
            .json(&body)
            .send();

        let response = tokio::select! {
            result = call => result.map_err(|e| RpcError::Transport(e.to_string()))?,
            _ = tokio::time::sleep(timeout) => return Err(RpcError::Timeout),
        };

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_is_distinguishable_from_transport_error() {
        // No server listening on this port: the connection itself fails
        // fast, well inside the timeout window, so this exercises the
        // transport-error path rather than the timeout path.
        let client = RpcClient::new("http://127.0.0.1:1");
        let err = client
            .request("initialize", serde_json::json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn ids_increase_monotonically() {
        let client = RpcClient::new("http://127.0.0.1:9");
        let a = client.next_id.fetch_add(1, Ordering::SeqCst);
        let b = client.next_id.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}
