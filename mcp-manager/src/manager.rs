//! The Manager: an orchestrator owning
//! the set of live [`PeerSession`]s, delegating installation to
//! `mcp-installer` and persistence to [`ServerRegistry`].
//!
//! A multi-peer supervisor: it owns an arbitrary number of named
//! [`PeerSession`]s and republishes each one's events onto a single shared
//! channel the host subscribes to once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcp_common::{ManagerEvent, PeerState, ServerRecord};
use mcp_core::VersionCatalog;
use mcp_installer::{InstallOptions, InstallerConfig};
use mcp_session::{PeerSession, SessionConfig};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::registry::{ImportOutcome, RegistryExport, ServerRegistry};

pub struct Manager {
    registry: Arc<ServerRegistry>,
    installer: Arc<mcp_installer::Installer>,
    catalog: Arc<VersionCatalog>,
    session_config: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    events: broadcast::Sender<ManagerEvent>,
}

impl Manager {
    pub async fn new(data_dir: impl Into<std::path::PathBuf>, installer_config: InstallerConfig) -> ManagerResult<Self> {
        let (events, _rx) = broadcast::channel(mcp_common::events::EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(ServerRegistry::load(data_dir, events.clone()).await?);
        let installer = Arc::new(mcp_installer::Installer::new(installer_config, events.clone()));
        Ok(Self {
            registry,
            installer,
            catalog: Arc::new(VersionCatalog::default_catalog()),
            session_config: SessionConfig::default(),
            sessions: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// `install(url, options)`: on success, `addOrReplace` the
    /// returned record with `overwrite` refused by default; if
    /// `options.autoStart`, starts it.
    pub async fn install(&self, url: &str, options: InstallOptions) -> ManagerResult<ServerRecord> {
        let outcome = self.installer.install(url, &options).await?;
        if self.registry.get(&outcome.record.id).await.is_some() {
            return Err(ManagerError::InstallWouldOverwrite(outcome.record.id));
        }
        let record = self.registry.add(outcome.record).await?;
        self.emit(ManagerEvent::ServerInstalled { id: record.id.clone() });
        if options.auto_start {
            self.start(&record.id).await?;
        }
        Ok(record)
    }

    /// `start(id)`.
    pub async fn start(&self, id: &str) -> ManagerResult<Arc<PeerSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                if session.state().await == PeerState::Running {
                    return Ok(session.clone());
                }
            }
        }
        // Stale session (stopped/errored) gets replaced, never reused.
        self.sessions.write().await.remove(id);

        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;

        self.registry.set_status(id, PeerState::Starting, None).await?;
        self.emit(ManagerEvent::ServerStarting { id: id.to_string() });

        let (session, mut session_events) = PeerSession::new(
            id.to_string(),
            record.invocation.clone(),
            self.catalog.clone(),
            self.session_config.clone(),
        );
        let session = Arc::new(session);

        let forward_to = self.events.clone();
        tokio::spawn(async move {
            loop {
                match session_events.recv().await {
                    Ok(event) => {
                        let _ = forward_to.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        match session.start().await {
            Ok(()) => {
                self.sessions.write().await.insert(id.to_string(), session.clone());
                let protocol_version = session.negotiated_version().await.unwrap_or_default();
                let pid = session.pid().await;
                self.registry.set_status(id, PeerState::Running, None).await?;
                self.emit(ManagerEvent::ServerStarted {
                    id: id.to_string(),
                    pid,
                    protocol_version,
                });
                Ok(session)
            }
            Err(e) => {
                self.registry.set_status(id, PeerState::Error, Some(e.to_string())).await?;
                Err(ManagerError::Session(e))
            }
        }
    }

    /// `stop(id)`.
    pub async fn stop(&self, id: &str) -> ManagerResult<()> {
        if let Some(session) = self.sessions.write().await.remove(id) {
            self.emit(ManagerEvent::ServerStopping { id: id.to_string() });
            session.stop().await?;
        }
        self.registry.set_status(id, PeerState::Stopped, None).await?;
        self.emit(ManagerEvent::ServerStopped { id: id.to_string() });
        Ok(())
    }

    /// `restart(id)`: stop (if live) + 1s pause + start,
    /// incrementing `restartCount`.
    pub async fn restart(&self, id: &str) -> ManagerResult<Arc<PeerSession>> {
        let was_live = self.sessions.read().await.contains_key(id);
        if was_live {
            self.stop(id).await?;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        match self.start(id).await {
            Ok(session) => {
                self.registry.increment_restart_count(id).await?;
                Ok(session)
            }
            Err(e) => {
                self.emit(ManagerEvent::ServerRestartFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// `uninstall(id)`: stop if running, remove files via the
    /// installer, then remove the registry entry.
    pub async fn uninstall(&self, id: &str) -> ManagerResult<()> {
        if self.sessions.read().await.contains_key(id) {
            self.stop(id).await?;
        }
        let record = self.registry.get(id).await.ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;
        self.installer.uninstall(&record).await?;
        self.registry.remove(id).await?;
        Ok(())
    }

    /// `update(id, options)`: stop if running, re-run the
    /// installer from the record's `installUrl`.
    pub async fn update(&self, id: &str, options: InstallOptions) -> ManagerResult<ServerRecord> {
        let existing = self.sessions.read().await.get(id).cloned();
        let was_running = match &existing {
            Some(session) => session.state().await == PeerState::Running,
            None => false,
        };
        if was_running {
            self.stop(id).await?;
        }
        let record = self.registry.get(id).await.ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;
        let outcome = self.installer.install(&record.install_url, &options).await?;
        let mut reinstalled = outcome.record;
        reinstalled.id = record.id.clone();
        let updated = self
            .registry
            .update(id, |r| {
                r.invocation = reinstalled.invocation.clone();
                r.version = reinstalled.version.clone();
                r.metadata = reinstalled.metadata.clone();
            })
            .await?;
        if was_running {
            self.start(id).await?;
        }
        Ok(updated)
    }

    pub async fn list(&self) -> Vec<ServerRecord> {
        self.registry.list().await
    }

    pub async fn status(&self, id: &str) -> Option<mcp_common::ServerStatus> {
        self.registry.status_of(id).await
    }

    /// `health(id)`: a `listTools` probe; success means healthy.
    pub async fn health(&self, id: &str) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(session) => session.list_tools().await.is_ok(),
            None => false,
        }
    }

    pub async fn get_client(&self, id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// `startAutoStartServers()`: starts every server with
    /// `metadata.autoStart = true`, returning per-id outcomes.
    pub async fn start_auto_start_servers(&self) -> HashMap<String, ManagerResult<()>> {
        let mut outcomes = HashMap::new();
        let candidates: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|r| r.metadata.auto_start)
            .map(|r| r.id)
            .collect();
        for id in candidates {
            let outcome = self.start(&id).await.map(|_| ());
            if let Err(e) = &outcome {
                warn!(id, error = %e, "auto-start failed");
            } else {
                info!(id, "auto-started");
            }
            outcomes.insert(id, outcome);
        }
        outcomes
    }

    /// `stopAll()`.
    pub async fn stop_all(&self) -> ManagerResult<()> {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await?;
        }
        Ok(())
    }

    pub async fn clear_cache(&self) -> ManagerResult<()> {
        self.installer.clear_cache().await?;
        Ok(())
    }

    /// `dispose()`: stops all sessions; the broadcast channel's
    /// last sender drops with this `Manager`, closing every subscriber.
    pub async fn dispose(&self) -> ManagerResult<()> {
        self.stop_all().await
    }

    pub async fn export(&self, ids: Option<&[String]>) -> RegistryExport {
        self.registry.export(ids).await
    }

    pub async fn import(&self, blob: RegistryExport, overwrite: bool) -> ManagerResult<ImportOutcome> {
        Ok(self.registry.import(blob, overwrite).await?)
    }

    /// Convenience wrapper used by `mcp-cli`: call a tool on a running
    /// server by id, surfacing `ManagerError::ServerNotFound` if it isn't
    /// live rather than a raw session error.
    pub async fn call_tool(&self, id: &str, name: &str, args: Value) -> ManagerResult<Value> {
        let session = self.get_client(id).await.ok_or_else(|| ManagerError::ServerNotFound(id.to_string()))?;
        Ok(session.call_tool(name, args).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_unknown_server_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer_config = InstallerConfig::default();
        installer_config.install_root = dir.path().join("servers");
        let manager = Manager::new(dir.path().join("data"), installer_config).await.unwrap();
        let err = manager.start("does-not-exist").await.unwrap_err();
        assert!(matches!(err, ManagerError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn install_refuses_to_overwrite_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer_config = InstallerConfig::default();
        installer_config.install_root = dir.path().join("servers");
        let manager = Manager::new(dir.path().join("data"), installer_config).await.unwrap();

        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("index.js"), "console.log(1)").unwrap();
        let url = format!("file://{}", source.path().display());

        manager.install(&url, InstallOptions::default()).await.unwrap();
        let err = manager.install(&url, InstallOptions::default()).await.unwrap_err();
        assert!(matches!(err, ManagerError::InstallWouldOverwrite(_)));
    }
}
