//! Installer cache: a cache key derived from `{type, fullName, version,
//! options}`, backed by one JSON file per key under
//! `<install_root>/.cache/metadata/<key>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{InstallError, InstallResult};
use mcp_common::ServerRecord;

/// The persisted cache entry for one prior install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub cache_key: String,
    pub server_config: ServerRecord,
    pub install_path: String,
}

/// Derive the stable 16-character cache key for `{type, fullName, version,
/// options}`. `options` is passed pre-serialized by the
/// caller so cache-key derivation doesn't need to know `InstallOptions`'s
/// shape.
pub fn cache_key(origin_type: &str, full_name: &str, version: &str, options_fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(full_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(version.as_bytes());
    hasher.update(b"\0");
    hasher.update(options_fingerprint.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Reads/writes cache metadata under one installer's configured cache
/// root. Every write is write-temp-then-rename, so a reader never
/// observes a partially written entry.
pub struct MetadataCache {
    root: PathBuf,
}

impl MetadataCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Returns the cached entry if present, not expired by `ttl`, and
    /// whose `install_path` still exists on disk.
    pub async fn get(&self, key: &str, ttl: std::time::Duration) -> InstallResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(InstallError::Io(e)),
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| InstallError::Cache(format!("corrupt cache entry {key}: {e}")))?;
        let age = Utc::now().signed_duration_since(entry.timestamp);
        let ttl_chrono = chrono::Duration::from_std(ttl)
            .map_err(|e| InstallError::Cache(e.to_string()))?;
        if age > ttl_chrono {
            return Ok(None);
        }
        if !Path::new(&entry.install_path).exists() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn put(&self, entry: &CacheEntry) -> InstallResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(&entry.cache_key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entry)
            .map_err(|e| InstallError::Cache(e.to_string()))?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// `clearCache`: removes every metadata entry, leaving installed
    /// source trees untouched.
    pub async fn clear(&self) -> InstallResult<()> {
        match tokio::fs::read_dir(&self.root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                        tokio::fs::remove_file(entry.path()).await?;
                    }
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InstallError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_common::{InstallMethod, Invocation, ServerMetadata};

    fn sample_record() -> ServerRecord {
        ServerRecord {
            id: "echo".to_string(),
            name: "Echo".to_string(),
            description: None,
            version: None,
            invocation: Invocation::new("node", vec!["index.js".into()], "/tmp/echo"),
            install_method: InstallMethod::Enhanced,
            install_url: "npm:echo".to_string(),
            metadata: ServerMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cache_key_is_stable_and_16_chars() {
        let a = cache_key("npm", "echo", "latest", "{}");
        let b = cache_key("npm", "echo", "latest", "{}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn cache_key_differs_on_version() {
        let a = cache_key("npm", "echo", "1.0.0", "{}");
        let b = cache_key("npm", "echo", "2.0.0", "{}");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let install_path = dir.path().join("echo");
        tokio::fs::create_dir_all(&install_path).await.unwrap();
        let cache = MetadataCache::new(dir.path().join("metadata"));
        let key = cache_key("npm", "echo", "latest", "{}");
        let entry = CacheEntry {
            timestamp: Utc::now(),
            cache_key: key.clone(),
            server_config: sample_record(),
            install_path: install_path.to_string_lossy().to_string(),
        };
        cache.put(&entry).await.unwrap();
        let fetched = cache.get(&key, std::time::Duration::from_secs(3600)).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let install_path = dir.path().join("echo");
        tokio::fs::create_dir_all(&install_path).await.unwrap();
        let cache = MetadataCache::new(dir.path().join("metadata"));
        let key = cache_key("npm", "echo", "latest", "{}");
        let entry = CacheEntry {
            timestamp: Utc::now() - chrono::Duration::days(30),
            cache_key: key.clone(),
            server_config: sample_record(),
            install_path: install_path.to_string_lossy().to_string(),
        };
        cache.put(&entry).await.unwrap();
        let fetched = cache.get(&key, std::time::Duration::from_secs(3600)).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn entry_whose_install_path_vanished_is_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let install_path = dir.path().join("gone");
        let cache = MetadataCache::new(dir.path().join("metadata"));
        let key = cache_key("npm", "echo", "latest", "{}");
        let entry = CacheEntry {
            timestamp: Utc::now(),
            cache_key: key.clone(),
            server_config: sample_record(),
            install_path: install_path.to_string_lossy().to_string(),
        };
        cache.put(&entry).await.unwrap();
        let fetched = cache.get(&key, std::time::Duration::from_secs(3600)).await.unwrap();
        assert!(fetched.is_none());
    }
}
