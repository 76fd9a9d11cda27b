// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

/// A JSON-RPC error as it appears on the wire (`{code, message}`).
#[derive(Debug, Clone)]
pub struct McpError {
    pub code: i64,
    pub message: String,
}

impl McpError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("method not found: {method}"),
        }
    }
}

/// Handles `initialize`, `tools/list`, `tools/call` — the methods every
/// mounted member (real or mocked) must answer (spec §4.D).
#[async_trait::async_trait]
pub trait StandardMcpHandler: Send + Sync {
    async fn initialize(&self, params: Value) -> Result<Value, McpError>;
    async fn list_tools(&self) -> Result<Value, McpError>;
    async fn call_tool(&self, params: Value) -> Result<Value, McpError>;
}

/// Handles the `worker/*` method family for a single mount (spec §4.D,
/// §4.K). Implemented by the Worker Dispatch Bridge.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, McpError>;
}

#[derive(Default)]
struct Mount {
    standard: Option<Arc<dyn StandardMcpHandler>>,
    worker: Option<Arc<dyn Dispatcher>>,
}

/// Routes inbound JSON-RPC over HTTP POST to the handler registered for a
/// named mount, demultiplexing by method prefix: `worker/*` goes to the
/// mount's [`Dispatcher`], everything else to its [`StandardMcpHandler`]
/// (spec §4.D).
#[derive(Clone, Default)]
pub struct McpTransport {
    mounts: Arc<Mutex<HashMap<String, Mount>>>,
}

impl McpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_standard(&self, name: impl Into<String>, handler: Arc<dyn StandardMcpHandler>) {
        let mut mounts = self.mounts.lock().unwrap();
        mounts.entry(name.into()).or_default().standard = Some(handler);
    }

    pub fn mount_worker(&self, name: impl Into<String>, dispatcher: Arc<dyn Dispatcher>) {
        let mut mounts = self.mounts.lock().unwrap();
        mounts.entry(name.into()).or_default().worker = Some(dispatcher);
    }

    pub fn unmount(&self, name: &str) {
        self.mounts.lock().unwrap().remove(name);
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp/:name", post(handle_rpc))
            .with_state(self.clone())
    }

    async fn dispatch(&self, name: &str, method: &str, params: Value) -> Result<Value, McpError> {
        let (standard, worker) = {
            let mounts = self.mounts.lock().unwrap();
            let mount = mounts
                .get(name)
                .ok_or_else(|| McpError::method_not_found(method))?;
            (mount.standard.clone(), mount.worker.clone())
        };

        if let Some(rest) = method.strip_prefix("worker/") {
            let worker = worker.ok_or_else(|| McpError::method_not_found(method))?;
            return worker.dispatch(&format!("worker/{rest}"), params).await;
        }

        let standard = standard.ok_or_else(|| McpError::method_not_found(method))?;
        match method {
            "initialize" => standard.initialize(params).await,
            "tools/list" => standard.list_tools().await,
            "tools/call" => standard.call_tool(params).await,
            other => Err(McpError::method_not_found(other)),
        }
    }
}

async fn handle_rpc(
    State(transport): State<McpTransport>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let id = body.get("id").cloned();
    let method = body
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = body.get("params").cloned().unwrap_or(Value::Null);

    if id.is_none() {
        // Notification: forward and return immediately, per spec §4.D.
        tokio::spawn(async move {
            let _ = transport.dispatch(&name, &method, params).await;
        });
        return Json(serde_json::json!({}));
    }

    let result = transport.dispatch(&name, &method, params).await;
    let id = id.unwrap();
    let envelope = match result {
        Ok(value) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": value}),
        Err(err) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": err.code, "message": err.message},
        }),
    };
    Json(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoStandard;

    #[async_trait::async_trait]
    impl StandardMcpHandler for EchoStandard {
        async fn initialize(&self, _params: Value) -> Result<Value, McpError> {
            Ok(serde_json::json!({"ok": true}))
        }
        async fn list_tools(&self) -> Result<Value, McpError> {
            Ok(serde_json::json!({"tools": []}))
        }
        async fn call_tool(&self, params: Value) -> Result<Value, McpError> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn routes_standard_methods_by_name() {
        let transport = McpTransport::new();
        transport.mount_standard("plugin-a", Arc::new(EchoStandard));

        let result = transport
            .dispatch("plugin-a", "initialize", Value::Null)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn unknown_mount_is_method_not_found() {
        let transport = McpTransport::new();
        let err = transport
            .dispatch("missing", "initialize", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[tokio::test]
    async fn worker_prefixed_methods_require_a_worker_mount() {
        let transport = McpTransport::new();
        transport.mount_standard("plugin-a", Arc::new(EchoStandard));
        let err = transport
            .dispatch("plugin-a", "worker/dispatch", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, -32601);
    }
}
