// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use guildhall_agent_sdk::AgentSdk;
use guildhall_config::Settings;
use guildhall_core::EventBus;
use guildhall_mcp::{discover, LifecycleManager, McpTransport, PortRegistry};
use guildhall_store::{JobStore, SessionStore};

use crate::session_manager::SessionManager;

/// Shared lazy singletons (spec §9 "Shared lazy singletons"): every field
/// is a once-guard so concurrent callers before first construction block on
/// the same initialization rather than racing to build duplicate instances.
pub struct ServerContext {
    home: PathBuf,
    guild_root: PathBuf,
    sdk: Arc<dyn AgentSdk>,
    local_mcp_base: String,
    settings: Settings,

    event_bus: OnceCell<Arc<EventBus>>,
    port_registry: OnceCell<Arc<PortRegistry>>,
    lifecycle: OnceCell<Arc<LifecycleManager>>,
    session_store: OnceCell<Arc<SessionStore>>,
    job_store: OnceCell<Arc<JobStore>>,
    mcp_transport: OnceCell<Arc<McpTransport>>,
    session_manager: OnceCell<Arc<SessionManager>>,
}

impl ServerContext {
    pub fn new(home: PathBuf, guild_root: PathBuf, sdk: Arc<dyn AgentSdk>, local_mcp_base: String) -> Self {
        Self::with_settings(home, guild_root, sdk, local_mcp_base, Settings::default())
    }

    pub fn with_settings(
        home: PathBuf,
        guild_root: PathBuf,
        sdk: Arc<dyn AgentSdk>,
        local_mcp_base: String,
        settings: Settings,
    ) -> Self {
        Self {
            home,
            guild_root,
            sdk,
            local_mcp_base,
            settings,
            event_bus: OnceCell::new(),
            port_registry: OnceCell::new(),
            lifecycle: OnceCell::new(),
            session_store: OnceCell::new(),
            job_store: OnceCell::new(),
            mcp_transport: OnceCell::new(),
            session_manager: OnceCell::new(),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn session_ttl_hours(&self) -> u64 {
        self.settings.session_ttl_hours
    }

    pub async fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus
            .get_or_init(|| async { Arc::new(EventBus::new()) })
            .await
            .clone()
    }

    pub async fn port_registry(&self) -> Arc<PortRegistry> {
        self.port_registry
            .get_or_init(|| async { Arc::new(PortRegistry::new()) })
            .await
            .clone()
    }

    /// First call performs boot cleanup (killing orphaned subprocesses left
    /// by a prior run) and discovery of the configured guild root.
    pub async fn lifecycle(&self) -> Arc<LifecycleManager> {
        if let Some(lm) = self.lifecycle.get() {
            return lm.clone();
        }
        let ports = self.port_registry().await;
        self.lifecycle
            .get_or_init(|| async {
                let lm = LifecycleManager::new(&self.home, ports);
                lm.boot_cleanup().await;
                lm.load_discovered(discover(&self.guild_root)).await;
                Arc::new(lm)
            })
            .await
            .clone()
    }

    pub async fn session_store(&self) -> Arc<SessionStore> {
        self.session_store
            .get_or_init(|| async { Arc::new(SessionStore::new(self.home.join("sessions"))) })
            .await
            .clone()
    }

    pub async fn job_store(&self) -> Arc<JobStore> {
        self.job_store
            .get_or_init(|| async { Arc::new(JobStore::new(self.home.join("jobs"))) })
            .await
            .clone()
    }

    pub async fn mcp_transport(&self) -> Arc<McpTransport> {
        self.mcp_transport
            .get_or_init(|| async { Arc::new(McpTransport::new()) })
            .await
            .clone()
    }

    pub async fn session_manager(&self) -> Arc<SessionManager> {
        if let Some(sm) = self.session_manager.get() {
            return sm.clone();
        }
        let sessions = self.session_store().await;
        let jobs = self.job_store().await;
        let lifecycle = self.lifecycle().await;
        let bus = self.event_bus().await;
        let transport = self.mcp_transport().await;
        self.session_manager
            .get_or_init(|| async {
                Arc::new(SessionManager::with_session_ttl(
                    sessions,
                    jobs,
                    lifecycle,
                    bus,
                    transport,
                    self.sdk.clone(),
                    self.local_mcp_base.clone(),
                    self.settings.session_ttl_hours,
                ))
            })
            .await
            .clone()
    }
}
