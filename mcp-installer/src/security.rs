//! Security gates: the source validator run
//! before acquisition, and the build scanner run after a successful build.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::origin::Origin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of the source (pre-acquisition) security gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSecurityOutcome {
    pub ok: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub risk_level: RiskLevel,
}

const ALLOWED_DOMAINS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org", "npmjs.org", "pypi.org"];
const TRUSTED_PUBLISHERS: &[&str] = &["anthropic", "modelcontextprotocol", "microsoft"];
const UNSAFE_URL_CHARS: &[char] = &['<', '>', '"', '|'];
const MAX_URL_LEN: usize = 500;

/// Validate an origin against the allowed-domain list, a trusted-publisher
/// list, and URL-safety rules. Errors are fatal;
/// warnings (e.g. an unrecognized but not-unsafe domain) are not.
pub fn validate_source(origin: &Origin, url: &str) -> SourceSecurityOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if url.len() > MAX_URL_LEN {
        errors.push(format!("url exceeds {MAX_URL_LEN} characters"));
    }
    if url.contains("..") {
        errors.push("url contains a path traversal sequence '..'".to_string());
    }
    if url.chars().any(|c| UNSAFE_URL_CHARS.contains(&c)) {
        errors.push("url contains unsafe characters".to_string());
    }

    let domain = extract_domain(origin, url);
    let mut risk_level = RiskLevel::Low;
    match domain.as_deref() {
        Some(d) if ALLOWED_DOMAINS.iter().any(|allowed| d == *allowed || d.ends_with(&format!(".{allowed}"))) => {}
        Some(d) => {
            warnings.push(format!("origin domain {d:?} is not on the allowed-domain list"));
            risk_level = RiskLevel::Medium;
        }
        None => {
            // npm/pip bare package references have no domain to check;
            // not itself a risk signal.
        }
    }

    let publisher = publisher_of(origin);
    if let Some(publisher) = publisher {
        if !TRUSTED_PUBLISHERS.iter().any(|p| p.eq_ignore_ascii_case(&publisher)) {
            warnings.push(format!("publisher {publisher:?} is not on the trusted-publisher list"));
        }
    }

    SourceSecurityOutcome {
        ok: errors.is_empty(),
        warnings,
        errors,
        risk_level,
    }
}

fn extract_domain(origin: &Origin, url: &str) -> Option<String> {
    match origin {
        Origin::Github { .. } => Some("github.com".to_string()),
        Origin::Gitlab { .. } => Some("gitlab.com".to_string()),
        Origin::Bitbucket { .. } => Some("bitbucket.org".to_string()),
        Origin::GenericGit { .. } | Origin::Tarball { .. } => url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .map(str::to_string),
        Origin::Npm { .. } => Some("npmjs.org".to_string()),
        Origin::Pip { .. } => Some("pypi.org".to_string()),
        Origin::LocalFile { .. } => None,
    }
}

/// Organization/owner segment of a git-family origin, used as a coarse
/// publisher identity for the trusted-publisher check.
fn publisher_of(origin: &Origin) -> Option<String> {
    match origin {
        Origin::Github { clone_url, .. } | Origin::Gitlab { clone_url, .. } | Origin::Bitbucket { clone_url, .. } => {
            clone_url.split('/').rev().nth(1).map(str::to_string)
        }
        _ => None,
    }
}

// --- Build security scan ------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub severity: RiskLevel,
    pub description: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildSecurityOutcome {
    pub findings: Vec<SecurityFinding>,
    pub checksums: std::collections::HashMap<String, String>,
}

impl BuildSecurityOutcome {
    pub fn highest_risk(&self) -> Option<RiskLevel> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn has_blocking_risk(&self) -> bool {
        matches!(self.highest_risk(), Some(RiskLevel::High))
    }
}

const SCANNED_EXTENSIONS: &[&str] = &["js", "ts", "py", "sh", "bash", "json", "yaml", "yml"];
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", ".vscode", "dist", "build"];

/// Blocked patterns: dynamic eval/exec/spawn, child-process invocation,
/// recursive delete, privilege escalation, and paths to credential files.
const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    ("eval(", "dynamic eval() call"),
    ("exec(", "dynamic exec() call"),
    ("Function(", "dynamic Function() construction"),
    ("child_process", "child process invocation"),
    ("subprocess.Popen", "child process invocation"),
    ("os.system", "shell invocation via os.system"),
    ("rm -rf /", "recursive delete of filesystem root"),
    ("sudo ", "privilege escalation via sudo"),
    ("chmod 777", "overly permissive chmod"),
    (".ssh/id_rsa", "reference to an SSH private key path"),
    (".aws/credentials", "reference to AWS credential file"),
];

/// Recursively scan a source tree for blocked patterns and obfuscation
/// heuristics. Synchronous: the tree is already on
/// local disk by this stage, and blocking `std::fs` calls are cheap
/// relative to the build step that preceded this.
pub fn scan_build(root: &Path) -> std::io::Result<BuildSecurityOutcome> {
    let mut outcome = BuildSecurityOutcome::default();
    scan_dir(root, root, &mut outcome)?;
    scan_package_json_scripts(root, &mut outcome);
    compute_checksums(root, &mut outcome);
    Ok(outcome)
}

fn scan_dir(root: &Path, dir: &Path, outcome: &mut BuildSecurityOutcome) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            scan_dir(root, &path, outcome)?;
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !SCANNED_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        scan_file_content(root, &path, &content, outcome);
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned()
}

fn scan_file_content(root: &Path, path: &Path, content: &str, outcome: &mut BuildSecurityOutcome) {
    for (pattern, description) in BLOCKED_PATTERNS {
        if content.contains(pattern) {
            outcome.findings.push(SecurityFinding {
                severity: RiskLevel::High,
                description: description.to_string(),
                path: Some(relative(root, path)),
            });
        }
    }

    if is_obfuscated(content) {
        outcome.findings.push(SecurityFinding {
            severity: RiskLevel::Medium,
            description: "heuristic obfuscation: multiple long, low-whitespace lines in file header".to_string(),
            path: Some(relative(root, path)),
        });
    }
}

/// Heuristic obfuscation check: in the first 50 lines,
/// a line longer than 200 characters with fewer than 5 whitespace tokens,
/// or with more than 30% special characters, counts as suspicious; more
/// than 3 suspicious lines is an obfuscation finding.
fn is_obfuscated(content: &str) -> bool {
    let mut suspicious = 0;
    for line in content.lines().take(50) {
        if line.len() <= 200 {
            continue;
        }
        let whitespace_tokens = line.split_whitespace().count();
        let special = line.chars().filter(|c| !c.is_alphanumeric() && !c.is_whitespace()).count();
        let special_ratio = special as f64 / line.len() as f64;
        if whitespace_tokens < 5 || special_ratio > 0.3 {
            suspicious += 1;
        }
    }
    suspicious > 3
}

fn scan_package_json_scripts(root: &Path, outcome: &mut BuildSecurityOutcome) {
    let path = root.join("package.json");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) else {
        return;
    };

    if let Some(scripts) = value.get("scripts").and_then(|s| s.as_object()) {
        for (name, body) in scripts {
            let Some(body) = body.as_str() else { continue };
            for (pattern, description) in BLOCKED_PATTERNS {
                if body.contains(pattern) {
                    outcome.findings.push(SecurityFinding {
                        severity: RiskLevel::High,
                        description: format!("script {name:?}: {description}"),
                        path: Some("package.json".to_string()),
                    });
                }
            }
        }
    }

    for dep_key in ["dependencies", "devDependencies"] {
        if let Some(deps) = value.get(dep_key).and_then(|d| d.as_object()) {
            for name in deps.keys() {
                if name.contains("..") || name.contains('/') && !name.starts_with('@') {
                    outcome.findings.push(SecurityFinding {
                        severity: RiskLevel::Medium,
                        description: format!("suspicious dependency name {name:?}"),
                        path: Some("package.json".to_string()),
                    });
                }
            }
        }
    }
}

/// sha-256 of `{package.json, index.js, server.js, main.js}` if present.
fn compute_checksums(root: &Path, outcome: &mut BuildSecurityOutcome) {
    for name in ["package.json", "index.js", "server.js", "main.js"] {
        let path = root.join(name);
        if let Ok(bytes) = std::fs::read(&path) {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            outcome.checksums.insert(name.to_string(), hex::encode(hasher.finalize()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_domain_is_low_risk_with_no_errors() {
        let origin = Origin::Github {
            clone_url: "https://github.com/example/my-mcp".to_string(),
            branch: "main".to_string(),
            subpath: None,
        };
        let outcome = validate_source(&origin, "https://github.com/example/my-mcp");
        assert!(outcome.ok);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn path_traversal_in_url_is_fatal() {
        let origin = Origin::Tarball {
            download_url: "https://example.com/../evil.tar.gz".to_string(),
        };
        let outcome = validate_source(&origin, "https://example.com/../evil.tar.gz");
        assert!(!outcome.ok);
    }

    #[test]
    fn unrecognized_domain_warns_but_does_not_block() {
        let origin = Origin::GenericGit {
            clone_url: "https://example-host.test/repo.git".to_string(),
        };
        let outcome = validate_source(&origin, "https://example-host.test/repo.git");
        assert!(outcome.ok);
        assert!(!outcome.warnings.is_empty());
    }

    #[test]
    fn scan_build_flags_child_process_usage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.js"),
            "const cp = require('child_process'); cp.exec('ls');",
        )
        .unwrap();
        let outcome = scan_build(dir.path()).unwrap();
        assert!(outcome.has_blocking_risk());
    }

    #[test]
    fn scan_build_skips_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(
            dir.path().join("node_modules").join("bad.js"),
            "eval('console.log(1)')",
        )
        .unwrap();
        let outcome = scan_build(dir.path()).unwrap();
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn scan_build_computes_checksums_for_known_entrypoints() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log('hi')").unwrap();
        let outcome = scan_build(dir.path()).unwrap();
        assert!(outcome.checksums.contains_key("index.js"));
    }
}
