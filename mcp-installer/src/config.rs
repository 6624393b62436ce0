//! Installer tunables: install root, cache TTL, retry budget, timeouts.
//!
//! Loaded from an optional TOML file with `serde` defaults, following the
//! same extension-sniffing `from_file`/`to_file` idiom used elsewhere in
//! this workspace for config persistence — restricted here to TOML (and
//! JSON, for round-tripping the same value the CLI might print) since the
//! installer has no YAML consumer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{InstallError, InstallResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Root under which `<type>/<name>` source trees live. Default
    /// `$HOME/.vscode/mcp-servers`.
    pub install_root: PathBuf,

    /// How long a cache metadata entry is trusted before a reinstall is
    /// forced. Default 7 days.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Bound on `autoRetry` re-entries of the pipeline. Default 3.
    pub max_retries: u32,

    /// Per-command timeout for acquisition/dependency-install commands.
    /// Default 5 minutes.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Per-command timeout specifically for build commands. Default 10
    /// minutes.
    #[serde(with = "humantime_serde")]
    pub build_timeout: Duration,

    /// Whether high-risk build security findings block the install by
    /// default (`allowHighRisk`).
    pub allow_high_risk: bool,

    /// Whether a failed pipeline stage automatically retries the whole
    /// install from the top, up to `max_retries` times.
    pub auto_retry: bool,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        let install_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vscode")
            .join("mcp-servers");
        Self {
            install_root,
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            max_retries: 3,
            command_timeout: Duration::from_secs(5 * 60),
            build_timeout: Duration::from_secs(10 * 60),
            allow_high_risk: false,
            auto_retry: true,
        }
    }
}

impl InstallerConfig {
    pub fn cache_root(&self) -> PathBuf {
        self.install_root.join(".cache").join("metadata")
    }

    pub fn builds_cache_root(&self) -> PathBuf {
        self.install_root.join(".cache").join("builds")
    }

    pub fn from_file(path: impl AsRef<Path>) -> InstallResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| InstallError::Cache(format!("invalid config at {path:?}: {e}")))?,
            Some("toml") | None => toml::from_str(&content)
                .map_err(|e| InstallError::Cache(format!("invalid config at {path:?}: {e}")))?,
            Some(other) => {
                return Err(InstallError::Cache(format!(
                    "unsupported config format {other:?}, use .toml or .json"
                )))
            }
        };
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> InstallResult<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)
                .map_err(|e| InstallError::Cache(e.to_string()))?,
            _ => toml::to_string_pretty(self).map_err(|e| InstallError::Cache(e.to_string()))?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}
