//! Server Registry: the persistent
//! catalog of [`ServerRecord`]s and their volatile [`ServerStatus`],
//! serialized after every mutation and republished as [`ManagerEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mcp_common::{InstallMethod, ManagerEvent, PeerState, ServerRecord, ServerStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{RegistryError, RegistryResult};
use crate::store::RecordStore;

/// Bulk transfer payload for `export`/`import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryExport {
    pub servers: HashMap<String, ServerRecord>,
}

/// Outcome counts for `import`: "counts of imported, skipped,
/// errors").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct ServerRegistry {
    servers: RwLock<HashMap<String, ServerRecord>>,
    status: RwLock<HashMap<String, ServerStatus>>,
    store: RecordStore,
    events: tokio::sync::broadcast::Sender<ManagerEvent>,
}

impl ServerRegistry {
    pub async fn load(
        data_dir: impl Into<std::path::PathBuf>,
        events: tokio::sync::broadcast::Sender<ManagerEvent>,
    ) -> RegistryResult<Self> {
        let store = RecordStore::new(data_dir);
        let servers = store.load_servers().await?;
        let status = store.load_status().await?;
        Ok(Self {
            servers: RwLock::new(servers),
            status: RwLock::new(status),
            store,
            events,
        })
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    fn validate_new(record: &ServerRecord, existing: &HashMap<String, ServerRecord>) -> RegistryResult<()> {
        if !ServerRecord::id_is_valid(&record.id) {
            return Err(RegistryError::InvalidId(record.id.clone()));
        }
        if record.invocation.command.is_empty() {
            return Err(RegistryError::InvalidRecord("invocation.command must be non-empty".to_string()));
        }
        if existing.contains_key(&record.id) {
            return Err(RegistryError::AlreadyExists(record.id.clone()));
        }
        Ok(())
    }

    /// `add(record)`.
    pub async fn add(&self, record: ServerRecord) -> RegistryResult<ServerRecord> {
        let mut servers = self.servers.write().await;
        Self::validate_new(&record, &servers)?;
        servers.insert(record.id.clone(), record.clone());
        self.store.save_servers(&servers).await?;
        drop(servers);
        self.emit(ManagerEvent::ServerAdded { record: record.clone() });
        Ok(record)
    }

    /// `addOrReplace(record, overwrite)`.
    pub async fn add_or_replace(&self, record: ServerRecord, overwrite: bool) -> RegistryResult<ServerRecord> {
        if overwrite {
            let exists = self.servers.read().await.contains_key(&record.id);
            if exists {
                self.remove(&record.id).await?;
            }
        }
        self.add(record).await
    }

    /// `update(id, patch)`: `patch` is applied by the caller to
    /// a clone of the current record (id is immutable), then persisted.
    pub async fn update(&self, id: &str, patch: impl FnOnce(&mut ServerRecord)) -> RegistryResult<ServerRecord> {
        let mut servers = self.servers.write().await;
        let record = servers.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        patch(record);
        record.touch();
        let updated = record.clone();
        self.store.save_servers(&servers).await?;
        drop(servers);
        self.emit(ManagerEvent::ServerUpdated { record: updated.clone() });
        Ok(updated)
    }

    /// `remove(id)`.
    pub async fn remove(&self, id: &str) -> RegistryResult<ServerRecord> {
        let mut servers = self.servers.write().await;
        let record = servers.remove(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        self.store.save_servers(&servers).await?;
        drop(servers);

        let mut status = self.status.write().await;
        status.remove(id);
        self.store.save_status(&status).await?;
        drop(status);

        self.emit(ManagerEvent::ServerRemoved { id: id.to_string() });
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Option<ServerRecord> {
        self.servers.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ServerRecord> {
        self.servers.read().await.values().cloned().collect()
    }

    pub async fn list_by_method(&self, method: InstallMethod) -> Vec<ServerRecord> {
        self.servers
            .read()
            .await
            .values()
            .filter(|r| r.install_method == method)
            .cloned()
            .collect()
    }

    pub async fn status_of(&self, id: &str) -> Option<ServerStatus> {
        self.status.read().await.get(id).cloned()
    }

    /// `setStatus(id, state, details)`.
    pub async fn set_status(&self, id: &str, state: PeerState, detail: Option<String>) -> RegistryResult<ServerStatus> {
        let mut status = self.status.write().await;
        let entry = status.entry(id.to_string()).or_default();
        entry.transition_to(state, detail.clone());
        let updated = entry.clone();
        self.store.save_status(&status).await?;
        drop(status);
        self.emit(ManagerEvent::StatusChanged {
            id: id.to_string(),
            state,
            detail,
        });
        Ok(updated)
    }

    /// Bumps `ServerStatus.restartCount` on a `restart()`; not
    /// itself one of the named Registry operations, but the only Registry
    /// mutation `restart` needs beyond `setStatus`.
    pub async fn increment_restart_count(&self, id: &str) -> RegistryResult<ServerStatus> {
        let mut status = self.status.write().await;
        let entry = status.entry(id.to_string()).or_default();
        entry.restart_count += 1;
        let updated = entry.clone();
        self.store.save_status(&status).await?;
        Ok(updated)
    }

    /// `export(ids?)`.
    pub async fn export(&self, ids: Option<&[String]>) -> RegistryExport {
        let servers = self.servers.read().await;
        let selected = match ids {
            Some(ids) => servers
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
            None => servers.clone(),
        };
        RegistryExport { servers: selected }
    }

    /// `import(blob, overwrite)`: returns per-outcome counts.
    pub async fn import(&self, blob: RegistryExport, overwrite: bool) -> RegistryResult<ImportOutcome> {
        let mut outcome = ImportOutcome::default();
        for record in blob.servers.into_values() {
            match self.add_or_replace(record, overwrite).await {
                Ok(_) => outcome.imported += 1,
                Err(RegistryError::AlreadyExists(_)) => outcome.skipped += 1,
                Err(_) => outcome.errors += 1,
            }
        }
        Ok(outcome)
    }
}

pub type SharedRegistry = Arc<ServerRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_common::Invocation;

    fn record(id: &str) -> ServerRecord {
        ServerRecord {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            version: None,
            invocation: Invocation::new("node", vec!["index.js".into()], "/tmp"),
            install_method: InstallMethod::Enhanced,
            install_url: format!("npm:{id}"),
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn registry() -> ServerRegistry {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::broadcast::channel(16);
        ServerRegistry::load(dir.path().to_path_buf(), tx).await.unwrap()
    }

    #[tokio::test]
    async fn add_rejects_duplicate_id() {
        let reg = registry().await;
        reg.add(record("echo")).await.unwrap();
        let err = reg.add(record("echo")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn add_rejects_invalid_id() {
        let reg = registry().await;
        let err = reg.add(record("bad id!")).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidId(_)));
    }

    #[tokio::test]
    async fn update_preserves_id_and_bumps_updated_at() {
        let reg = registry().await;
        let original = reg.add(record("echo")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let updated = reg
            .update("echo", |r| r.description = Some("now with a description".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.id, original.id);
        assert!(updated.updated_at > original.updated_at);
    }

    #[tokio::test]
    async fn remove_clears_status_too() {
        let reg = registry().await;
        reg.add(record("echo")).await.unwrap();
        reg.set_status("echo", PeerState::Running, None).await.unwrap();
        reg.remove("echo").await.unwrap();
        assert!(reg.get("echo").await.is_none());
        assert!(reg.status_of("echo").await.is_none());
    }

    #[tokio::test]
    async fn set_status_error_increments_error_count() {
        let reg = registry().await;
        reg.add(record("echo")).await.unwrap();
        reg.set_status("echo", PeerState::Error, Some("boom".to_string())).await.unwrap();
        let status = reg.status_of("echo").await.unwrap();
        assert_eq!(status.error_count, 1);
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let reg = registry().await;
        reg.add(record("echo")).await.unwrap();
        reg.add(record("calc")).await.unwrap();
        let blob = reg.export(None).await;

        let reg2 = registry().await;
        let outcome = reg2.import(blob, true).await.unwrap();
        assert_eq!(outcome.imported, 2);
        assert_eq!(reg2.list().await.len(), 2);
    }

    #[tokio::test]
    async fn import_without_overwrite_skips_existing() {
        let reg = registry().await;
        reg.add(record("echo")).await.unwrap();
        let mut servers = HashMap::new();
        servers.insert("echo".to_string(), record("echo"));
        let outcome = reg.import(RegistryExport { servers }, false).await.unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.imported, 0);
    }
}
