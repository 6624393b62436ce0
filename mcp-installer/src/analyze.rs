//! Project analysis: detect project type, package
//! manager, and build system from sentinel files at the source root.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    pub fn install_command(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Npm => &["npm", "install"],
            PackageManager::Yarn => &["yarn", "install"],
            PackageManager::Pnpm => &["pnpm", "install"],
            PackageManager::Bun => &["bun", "install"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProject {
    pub package_manager: PackageManager,
    pub dependencies: Vec<String>,
    pub dev_dependencies: Vec<String>,
    pub scripts: std::collections::HashMap<String, String>,
    pub bin: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildSystem {
    TypeScript,
    Webpack,
    Rollup,
    Vite,
    Esbuild,
    Python,
    Rust,
    Go,
}

impl BuildSystem {
    /// Build commands tried in order, each run
    /// until one succeeds.
    pub fn build_commands(&self) -> &'static [&'static [&'static str]] {
        match self {
            BuildSystem::TypeScript => &[
                &["npm", "run", "build"],
                &["yarn", "build"],
                &["tsc"],
                &["bun", "run", "build"],
            ],
            BuildSystem::Webpack => &[&["npm", "run", "build"], &["yarn", "build"], &["webpack"], &["bun", "run", "build"]],
            BuildSystem::Rollup => &[
                &["npm", "run", "build"],
                &["yarn", "build"],
                &["rollup", "-c"],
                &["bun", "run", "build"],
            ],
            BuildSystem::Vite => &[
                &["npm", "run", "build"],
                &["yarn", "build"],
                &["vite", "build"],
                &["bun", "run", "build"],
            ],
            BuildSystem::Esbuild => &[&["npm", "run", "build"], &["yarn", "build"], &["esbuild"], &["bun", "run", "build"]],
            BuildSystem::Python => &[&["pip", "install", "-e", "."], &["python", "setup.py", "install"], &["poetry", "install"]],
            BuildSystem::Rust => &[&["cargo", "build", "--release"]],
            BuildSystem::Go => &[&["go", "build"], &["go", "install"]],
        }
    }

    /// Output directories searched in order.
    pub fn output_dirs(&self) -> &'static [&'static str] {
        match self {
            BuildSystem::TypeScript => &["dist", "build", "lib", "out"],
            BuildSystem::Webpack | BuildSystem::Rollup | BuildSystem::Vite | BuildSystem::Esbuild => {
                &["dist", "build"]
            }
            BuildSystem::Python => &["build", "dist"],
            BuildSystem::Rust => &["target/release"],
            BuildSystem::Go => &["bin"],
        }
    }
}

/// Detect the build system by the first matching sentinel file, in the
/// order given by its sentinel table.
pub fn detect_build_system(root: &Path) -> Option<BuildSystem> {
    const TABLE: &[(BuildSystem, &[&str])] = &[
        (BuildSystem::TypeScript, &["tsconfig.json"]),
        (BuildSystem::Webpack, &["webpack.config.js", "webpack.config.ts"]),
        (BuildSystem::Rollup, &["rollup.config.js", "rollup.config.ts"]),
        (BuildSystem::Vite, &["vite.config.js", "vite.config.ts"]),
        (BuildSystem::Esbuild, &["esbuild.config.js", "build.js"]),
        (BuildSystem::Python, &["setup.py", "pyproject.toml", "setup.cfg"]),
        (BuildSystem::Rust, &["Cargo.toml"]),
        (BuildSystem::Go, &["go.mod"]),
    ];
    for (system, sentinels) in TABLE {
        if sentinels.iter().any(|s| root.join(s).exists()) {
            return Some(*system);
        }
    }
    None
}

pub fn is_python_project(root: &Path) -> bool {
    ["requirements.txt", "setup.py", "pyproject.toml"]
        .iter()
        .any(|f| root.join(f).exists())
}

/// Parse `package.json`'s `dependencies`/`devDependencies`/`scripts`/`bin`
/// and infer the package manager from the lockfile present: `yarn.lock`
/// -> yarn, `pnpm-lock.yaml` -> pnpm, `bun.lockb` -> bun, else npm.
pub fn analyze_node_project(root: &Path) -> std::io::Result<Option<NodeProject>> {
    let package_json = root.join("package.json");
    if !package_json.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&package_json)?;
    let value: serde_json::Value = serde_json::from_str(&content).unwrap_or(serde_json::Value::Null);

    let package_manager = if root.join("yarn.lock").exists() {
        PackageManager::Yarn
    } else if root.join("pnpm-lock.yaml").exists() {
        PackageManager::Pnpm
    } else if root.join("bun.lockb").exists() {
        PackageManager::Bun
    } else {
        PackageManager::Npm
    };

    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_object())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    };
    let scripts = value
        .get("scripts")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(NodeProject {
        package_manager,
        dependencies: string_list("dependencies"),
        dev_dependencies: string_list("devDependencies"),
        scripts,
        bin: value.get("bin").cloned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_typescript_before_generic_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();
        assert!(matches!(detect_build_system(dir.path()), Some(BuildSystem::TypeScript)));
    }

    #[test]
    fn detects_rust_via_cargo_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        assert!(matches!(detect_build_system(dir.path()), Some(BuildSystem::Rust)));
    }

    #[test]
    fn infers_yarn_from_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"dependencies":{"foo":"1.0.0"}}"#).unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        let project = analyze_node_project(dir.path()).unwrap().unwrap();
        assert_eq!(project.package_manager, PackageManager::Yarn);
        assert_eq!(project.dependencies, vec!["foo".to_string()]);
    }

    #[test]
    fn no_package_json_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(analyze_node_project(dir.path()).unwrap().is_none());
    }
}
