//! Persisted state: two JSON blobs, `mcpServers` and
//! `mcpServerStatus`, each a mapping from server id to its record. The host
//! key/value store is modeled here as two files under a data directory,
//! written atomically (temp file then rename) so a crash mid-write never
//! leaves a torn file behind — the same pattern the installer's metadata
//! cache uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mcp_common::{ServerRecord, ServerStatus};

use crate::error::RegistryResult;

pub struct RecordStore {
    servers_path: PathBuf,
    status_path: PathBuf,
}

impl RecordStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            servers_path: data_dir.join("mcpServers.json"),
            status_path: data_dir.join("mcpServerStatus.json"),
        }
    }

    pub async fn load_servers(&self) -> RegistryResult<HashMap<String, ServerRecord>> {
        Self::load(&self.servers_path).await
    }

    pub async fn load_status(&self) -> RegistryResult<HashMap<String, ServerStatus>> {
        Self::load(&self.status_path).await
    }

    pub async fn save_servers(&self, servers: &HashMap<String, ServerRecord>) -> RegistryResult<()> {
        Self::save(&self.servers_path, servers).await
    }

    pub async fn save_status(&self, status: &HashMap<String, ServerStatus>) -> RegistryResult<()> {
        Self::save(&self.status_path, status).await
    }

    async fn load<T: serde::de::DeserializeOwned + Default>(path: &Path) -> RegistryResult<T> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| crate::error::RegistryError::Corrupt(format!("{path:?}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save<T: serde::Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| crate::error::RegistryError::Corrupt(e.to_string()))?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_common::{InstallMethod, Invocation};
    use chrono::Utc;

    #[tokio::test]
    async fn round_trips_servers_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        let mut servers = HashMap::new();
        servers.insert(
            "echo".to_string(),
            ServerRecord {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                description: None,
                version: None,
                invocation: Invocation::new("node", vec!["index.js".into()], "/tmp/echo"),
                install_method: InstallMethod::Enhanced,
                install_url: "npm:echo".to_string(),
                metadata: Default::default(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        store.save_servers(&servers).await.unwrap();

        let loaded = store.load_servers().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("echo"));
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let loaded = store.load_servers().await.unwrap();
        assert!(loaded.is_empty());
    }
}
