//! The Installer Pipeline itself: the orchestrator that runs the eleven
//! install stages and emits a `ManagerEvent` per stage.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use mcp_common::{InstallMethod, ManagerEvent, ServerMetadata, ServerRecord};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::analyze::{analyze_node_project, detect_build_system, is_python_project};
use crate::build::{install_dependencies, run_build, validate_build_output};
use crate::cache::{cache_key, CacheEntry, MetadataCache};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::InstallerConfig;
use crate::derive::derive_invocation;
use crate::error::{InstallError, InstallResult};
use crate::origin;
use crate::security::{scan_build, validate_source, RiskLevel};

/// Per-call overrides of the installer's default tunables:
/// `forceReinstall`, `allowHighRisk`, `autoRetry`/`maxRetries`, plus the
/// Manager's `autoStart` which only affects the metadata bag this pipeline
/// stamps onto the record).
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub force_reinstall: bool,
    pub allow_high_risk: bool,
    pub auto_start: bool,
    pub auto_retry: Option<bool>,
    pub max_retries: Option<u32>,
}

/// Outcome of one successful `install()` call.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub record: ServerRecord,
    pub from_cache: bool,
}

pub struct Installer {
    config: InstallerConfig,
    cache: MetadataCache,
    runner: Arc<dyn CommandRunner>,
    events: broadcast::Sender<ManagerEvent>,
}

impl Installer {
    pub fn new(config: InstallerConfig, events: broadcast::Sender<ManagerEvent>) -> Self {
        let cache = MetadataCache::new(config.cache_root());
        Self {
            config,
            cache,
            runner: Arc::new(SystemCommandRunner),
            events,
        }
    }

    /// Used by integration tests to substitute a [`crate::command::FakeCommandRunner`].
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    /// `install(url, options)`: classify, check cache, then run
    /// the pipeline, retrying on transient failures up to the configured
    /// budget.
    pub async fn install(&self, url: &str, options: &InstallOptions) -> InstallResult<InstallOutcome> {
        self.emit(ManagerEvent::InstallStarted {
            install_url: url.to_string(),
        });

        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let auto_retry = options.auto_retry.unwrap_or(self.config.auto_retry);

        let mut attempt = 0;
        loop {
            match self.run_once(url, options).await {
                Ok(outcome) => {
                    self.emit(ManagerEvent::InstallCompleted {
                        install_url: url.to_string(),
                        server_id: outcome.record.id.clone(),
                        from_cache: outcome.from_cache,
                    });
                    return Ok(outcome);
                }
                Err(e) => {
                    if !e.is_retryable() || !auto_retry || attempt >= max_retries {
                        self.emit(ManagerEvent::InstallFailed {
                            install_url: url.to_string(),
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                    warn!(url, attempt, error = %e, "install attempt failed, retrying");
                    attempt += 1;
                }
            }
        }
    }

    async fn run_once(&self, url: &str, options: &InstallOptions) -> InstallResult<InstallOutcome> {
        let origin = origin::parse(url);
        let full_name = origin.full_name();
        let version = origin.version().unwrap_or("latest").to_string();
        let key = cache_key(origin.type_tag(), &full_name, &version, "{}");

        // Step 1: cache check.
        if !options.force_reinstall {
            if let Some(entry) = self.cache.get(&key, self.config.cache_ttl).await? {
                info!(url, key, "installer cache hit");
                return Ok(InstallOutcome {
                    record: entry.server_config,
                    from_cache: true,
                });
            }
        }

        // Step 2: security gate (source).
        self.progress(url, "security-source", "validating origin");
        let source_outcome = validate_source(&origin, url);
        for warning in &source_outcome.warnings {
            self.emit(ManagerEvent::InstallProgress {
                install_url: url.to_string(),
                stage: "security-source".to_string(),
                detail: format!("warning: {warning}"),
            });
        }
        if !source_outcome.ok {
            return Err(InstallError::SecurityBlocked {
                url: url.to_string(),
                reasons: source_outcome.errors,
            });
        }

        // Step 3: acquisition.
        self.progress(url, "acquire", &format!("fetching {} {}", origin.type_tag(), full_name));
        let dest = self.config.install_root.join(origin.type_tag()).join(&full_name);
        crate::acquire::acquire(&origin, &dest, self.runner.as_ref(), self.config.command_timeout).await?;

        // Step 4: analysis.
        self.progress(url, "analyze", "detecting project type and build system");
        let node = analyze_node_project(&dest).map_err(InstallError::Io)?;
        let is_python = is_python_project(&dest);
        let build_system = detect_build_system(&dest);

        // Step 5: dependency install.
        self.progress(url, "dependencies", "installing dependencies");
        let deps_ok = install_dependencies(&dest, node.as_ref(), is_python, self.runner.as_ref(), self.config.command_timeout).await;
        if !deps_ok {
            warn!(url, "dependency install failed, continuing best-effort");
        }

        // Step 6: build.
        let output_dir: Option<PathBuf> = if let Some(system) = build_system {
            self.progress(url, "build", &format!("building with {system:?}"));
            Some(run_build(&dest, system, self.runner.as_ref(), self.config.build_timeout).await?)
        } else {
            None
        };

        // Step 7: build validation.
        if let Some(output_dir) = &output_dir {
            self.progress(url, "validate", "validating build output");
            if let Some(warning) = validate_build_output(output_dir, node.is_some())? {
                self.emit(ManagerEvent::InstallProgress {
                    install_url: url.to_string(),
                    stage: "validate".to_string(),
                    detail: format!("warning: {warning}"),
                });
            }
        }

        // Step 8: security scan (build).
        self.progress(url, "security-build", "scanning build output for risk");
        let scan = scan_build(&dest).map_err(InstallError::Io)?;
        let allow_high_risk = options.allow_high_risk || self.config.allow_high_risk;
        if scan.has_blocking_risk() && !allow_high_risk {
            return Err(InstallError::BuildSecurityBlocked {
                findings: scan.findings.iter().map(|f| f.description.clone()).collect(),
            });
        }
        let risk_level = scan.highest_risk().unwrap_or(RiskLevel::Low);

        // Step 9: command derivation.
        self.progress(url, "derive", "deriving invocation");
        let invocation = derive_invocation(&dest, output_dir.as_deref(), node.as_ref(), &full_name);

        let id = sanitize_id(&full_name);
        let now = Utc::now();
        let record = ServerRecord {
            id,
            name: full_name.clone(),
            description: None,
            version: Some(version.clone()),
            invocation,
            install_method: InstallMethod::Enhanced,
            install_url: origin.source_url(),
            metadata: ServerMetadata {
                install_path: Some(dest.to_string_lossy().into_owned()),
                install_id: Some(key.clone()),
                security_risk_level: Some(format!("{risk_level:?}").to_lowercase()),
                auto_start: options.auto_start,
            },
            created_at: now,
            updated_at: now,
        };

        // Step 10: cache write.
        self.cache
            .put(&CacheEntry {
                timestamp: now,
                cache_key: key,
                server_config: record.clone(),
                install_path: dest.to_string_lossy().into_owned(),
            })
            .await?;

        Ok(InstallOutcome {
            record,
            from_cache: false,
        })
    }

    fn progress(&self, url: &str, stage: &str, detail: &str) {
        self.emit(ManagerEvent::InstallProgress {
            install_url: url.to_string(),
            stage: stage.to_string(),
            detail: detail.to_string(),
        });
    }

    /// Remove a previously-installed server's source tree, leaving cache
    /// metadata untouched (a later `install()` of the same URL will miss
    /// the cache once this path no longer exists, per the `get()` check).
    pub async fn uninstall(&self, record: &ServerRecord) -> InstallResult<()> {
        if let Some(path) = &record.metadata.install_path {
            let path = PathBuf::from(path);
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }
        self.emit(ManagerEvent::ServerUninstalled { id: record.id.clone() });
        Ok(())
    }

    pub async fn clear_cache(&self) -> InstallResult<()> {
        self.cache.clear().await
    }
}

/// `ServerRecord::id_is_valid` requires `[A-Za-z0-9_-]+`; origin full
/// names routinely contain `@`, `/`, or `.` (scoped npm packages, pip
/// dotted names). Map anything outside the allowed class to `-`.
fn sanitize_id(full_name: &str) -> String {
    let sanitized: String = full_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "server".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_id_maps_scoped_npm_name() {
        assert_eq!(sanitize_id("@scope/name"), "scope-name");
    }

    #[test]
    fn sanitize_id_is_never_empty() {
        assert_eq!(sanitize_id("---"), "server");
    }

    #[tokio::test]
    async fn install_local_file_produces_invocation_and_caches() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("index.js"), "console.log('hi')").unwrap();

        let install_root = tempfile::tempdir().unwrap();
        let mut config = InstallerConfig::default();
        config.install_root = install_root.path().to_path_buf();

        let (tx, _rx) = broadcast::channel(16);
        let installer = Installer::new(config, tx);

        let url = format!("file://{}", source.path().display());
        let outcome = installer.install(&url, &InstallOptions::default()).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.record.invocation.command, "node");

        // Re-running the same URL should hit the cache.
        let second = installer.install(&url, &InstallOptions::default()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.record.id, outcome.record.id);
    }

    #[tokio::test]
    async fn install_rejects_path_traversal_in_url() {
        let install_root = tempfile::tempdir().unwrap();
        let mut config = InstallerConfig::default();
        config.install_root = install_root.path().to_path_buf();
        let (tx, _rx) = broadcast::channel(16);
        let installer = Installer::new(config, tx);

        let err = installer
            .install("https://example.com/../evil.tar.gz", &InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::SecurityBlocked { .. }));
    }
}
