// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use guildhall_config::{PluginManifest, Transport};

use crate::discovery::{GuildMember, MemberStatus};
use crate::port::PortRegistry;
use crate::rpc_client::{RpcClient, RpcError};

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const INVOKE_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unknown guild member {0:?}")]
    NotFound(String),
    #[error("spawning {0:?}: {1}")]
    SpawnFailed(String, String),
    #[error("{0:?} declares transport {1:?}, which the Lifecycle Manager does not drive")]
    UnsupportedTransport(String, Transport),
    #[error("{0:?} failed to initialize in time")]
    InitializeTimeout(String),
    #[error("{0:?} rejected initialize: {1}")]
    InitializeFailed(String, String),
    #[error("transport has no registered port for {0:?}")]
    NotConnected(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

struct PluginHandle {
    pid: u32,
    port: u16,
    rpc: Arc<RpcClient>,
}

struct MemberState {
    manifest: Option<PluginManifest>,
    status: MemberStatus,
    tools: Vec<String>,
    last_error: Option<String>,
    handle: Option<PluginHandle>,
}

impl From<GuildMember> for MemberState {
    fn from(m: GuildMember) -> Self {
        Self {
            manifest: m.manifest,
            status: m.status,
            tools: m.tools,
            last_error: m.last_error,
            handle: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PidFile {
    pid: i32,
    port: u16,
}

/// Spawns, initializes, tracks, and tears down guild member subprocesses
/// (spec §4.E). The hardest subsystem in the core: owns the only mutable
/// view of each member's subprocess handle.
pub struct LifecycleManager {
    members: Arc<Mutex<HashMap<String, MemberState>>>,
    ports: Arc<PortRegistry>,
    pid_dir: PathBuf,
}

fn flatten_name(name: &str) -> String {
    name.replace('/', "--")
}

impl LifecycleManager {
    pub fn new(home: &Path, ports: Arc<PortRegistry>) -> Self {
        Self {
            members: Arc::new(Mutex::new(HashMap::new())),
            ports,
            pid_dir: home.join(".mcp-servers"),
        }
    }

    /// Seed the manager with the members found by discovery. Existing
    /// entries for names not present in `discovered` are dropped.
    pub async fn load_discovered(&self, discovered: HashMap<String, GuildMember>) {
        let mut members = self.members.lock().await;
        *members = discovered
            .into_iter()
            .map(|(name, member)| (name, MemberState::from(member)))
            .collect();
    }

    pub async fn status(&self, name: &str) -> Option<(MemberStatus, Vec<String>, Option<String>)> {
        let members = self.members.lock().await;
        members
            .get(name)
            .map(|m| (m.status.clone(), m.tools.clone(), m.last_error.clone()))
    }

    /// The base URL a connected member's subprocess is reachable at, for
    /// handing to the agent SDK as a [`ToolServerSpec`]-style entry. `None`
    /// if the member is unknown or not currently connected.
    pub async fn bound_url(&self, name: &str) -> Option<String> {
        let members = self.members.lock().await;
        members
            .get(name)
            .and_then(|m| m.handle.as_ref())
            .map(|h| h.rpc.base_url().to_string())
    }

    /// Spawn and initialize a member's subprocess. Idempotent when the
    /// member is already connected.
    pub async fn start(&self, name: &str) -> Result<(), LifecycleError> {
        let manifest = {
            let members = self.members.lock().await;
            let state = members
                .get(name)
                .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;
            if state.status == MemberStatus::Connected {
                return Ok(());
            }
            state
                .manifest
                .clone()
                .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?
        };

        if manifest.transport != Transport::Http {
            return Err(LifecycleError::UnsupportedTransport(
                name.to_string(),
                manifest.transport,
            ));
        }

        let port = self
            .ports
            .allocate()
            .map_err(|e| LifecycleError::SpawnFailed(name.to_string(), e.to_string()))?;
        let args = manifest.mcp.substitute_port(port);

        let child = Command::new(&manifest.mcp.command)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.ports.mark_dead(port);
                LifecycleError::SpawnFailed(name.to_string(), e.to_string())
            })?;

        let pid = child
            .id()
            .ok_or_else(|| LifecycleError::SpawnFailed(name.to_string(), "no pid".to_string()))?;
        self.write_pid_file(name, pid as i32, port).await;

        {
            let mut members = self.members.lock().await;
            if let Some(state) = members.get_mut(name) {
                state.status = MemberStatus::Available;
                state.handle = Some(PluginHandle {
                    pid,
                    port,
                    rpc: Arc::new(RpcClient::new(format!("http://127.0.0.1:{port}"))),
                });
            }
        }

        // The watcher owns the `Child` so `wait()` never holds the members
        // lock for the process's whole lifetime.
        self.spawn_crash_watcher(name.to_string(), child);

        let rpc = {
            let members = self.members.lock().await;
            members.get(name).and_then(|m| m.handle.as_ref()).map(|h| h.rpc.clone())
        };
        let Some(rpc) = rpc else {
            return Err(LifecycleError::NotFound(name.to_string()));
        };

        match rpc
            .request("initialize", serde_json::json!({}), INIT_TIMEOUT)
            .await
        {
            Ok(_) => {}
            Err(RpcError::Timeout) => {
                self.fail_and_teardown(name, port, "failed to initialize".to_string())
                    .await;
                return Err(LifecycleError::InitializeTimeout(name.to_string()));
            }
            Err(other) => {
                self.fail_and_teardown(name, port, other.to_string()).await;
                return Err(LifecycleError::InitializeFailed(
                    name.to_string(),
                    other.to_string(),
                ));
            }
        }

        let tools = match rpc
            .request("tools/list", serde_json::json!({}), INIT_TIMEOUT)
            .await
        {
            Ok(value) => extract_tool_names(&value),
            Err(_) => Vec::new(),
        };

        {
            let mut members = self.members.lock().await;
            if let Some(state) = members.get_mut(name) {
                state.status = MemberStatus::Connected;
                state.tools = tools;
                state.last_error = None;
            }
        }
        info!(member = name, port, "guild member connected");
        Ok(())
    }

    async fn fail_and_teardown(&self, name: &str, port: u16, reason: String) {
        self.ports.mark_dead(port);
        let mut members = self.members.lock().await;
        if let Some(state) = members.get_mut(name) {
            if let Some(handle) = state.handle.take() {
                send_signal(handle.pid as i32, libc::SIGKILL);
            }
            state.status = MemberStatus::Error;
            state.last_error = Some(reason);
        }
    }

    /// Dispatch a tool call to an already-connected member. Timeouts leave
    /// the member connected; transport failures mark it errored.
    pub async fn invoke_tool(
        &self,
        name: &str,
        tool: &str,
        input: Value,
    ) -> Result<Value, LifecycleError> {
        let rpc = {
            let members = self.members.lock().await;
            let state = members
                .get(name)
                .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;
            state
                .handle
                .as_ref()
                .map(|h| h.rpc.clone())
                .ok_or_else(|| LifecycleError::NotConnected(name.to_string()))?
        };

        let params = serde_json::json!({"name": tool, "arguments": input});
        match rpc.request("tools/call", params, INVOKE_TIMEOUT).await {
            Ok(value) => Ok(value),
            Err(RpcError::Timeout) => Err(LifecycleError::Rpc(RpcError::Timeout)),
            Err(other) => {
                let port = {
                    let members = self.members.lock().await;
                    members
                        .get(name)
                        .and_then(|m| m.handle.as_ref())
                        .map(|h| h.port)
                };
                if let Some(port) = port {
                    self.fail_and_teardown(name, port, other.to_string()).await;
                }
                Err(LifecycleError::Rpc(other))
            }
        }
    }

    /// `child` is owned by this task alone so `wait()` never holds the
    /// members lock for the process's whole lifetime.
    fn spawn_crash_watcher(&self, name: String, mut child: Child) {
        let members = self.members.clone();
        let ports = self.ports.clone();
        tokio::spawn(async move {
            if child.wait().await.is_err() {
                return;
            }
            let mut guard = members.lock().await;
            if let Some(state) = guard.get_mut(&name) {
                if let Some(handle) = state.handle.take() {
                    ports.mark_dead(handle.port);
                }
                state.status = MemberStatus::Error;
                state.last_error = Some("subprocess exited".to_string());
                warn!(member = %name, "guild member subprocess exited");
            }
        });
    }

    async fn write_pid_file(&self, name: &str, pid: i32, port: u16) {
        if tokio::fs::create_dir_all(&self.pid_dir).await.is_err() {
            return;
        }
        let path = self.pid_dir.join(format!("{}.json", flatten_name(name)));
        let body = match serde_json::to_vec_pretty(&PidFile { pid, port }) {
            Ok(b) => b,
            Err(_) => return,
        };
        let tmp = path.with_extension("json.tmp");
        if tokio::fs::write(&tmp, body).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, &path).await;
        }
    }

    /// Terminate every live child with SIGTERM, wait a grace period, then
    /// SIGKILL any still alive.
    pub async fn shutdown_all(&self) {
        let members = self.members.lock().await;
        let pids: Vec<i32> = members
            .values()
            .filter_map(|state| state.handle.as_ref().map(|h| h.pid as i32))
            .collect();
        drop(members);

        for pid in &pids {
            send_signal(*pid, libc::SIGTERM);
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        for pid in &pids {
            if process_alive(*pid) {
                send_signal(*pid, libc::SIGKILL);
            }
        }

        let mut members = self.members.lock().await;
        for state in members.values_mut() {
            state.handle = None;
            state.status = MemberStatus::Disconnected;
        }
        let _ = tokio::fs::remove_dir_all(&self.pid_dir).await;
    }

    /// Reads PID files left by a previous run, kills any still-live orphan
    /// process, then clears the directory (spec §4.E.5 "boot cleanup").
    pub async fn boot_cleanup(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.pid_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if let Ok(pid_file) = serde_json::from_slice::<PidFile>(&bytes) {
                    if process_alive(pid_file.pid) {
                        send_signal(pid_file.pid, libc::SIGTERM);
                    }
                }
            }
        }
        let _ = tokio::fs::remove_dir_all(&self.pid_dir).await;
    }
}

fn send_signal(pid: i32, signal: i32) {
    // SAFETY: `pid` was captured from a `Child` we spawned (or, during boot
    // cleanup, read back from our own PID file); sending a signal to a
    // possibly-already-exited pid is well-defined (ESRCH is ignored).
    unsafe {
        libc::kill(pid, signal);
    }
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission checks.
    unsafe { libc::kill(pid, 0) == 0 }
}

fn extract_tool_names(value: &Value) -> Vec<String> {
    value
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
