//! Command derivation: produce the runnable
//! [`Invocation`] for a built server.

use std::path::Path;

use mcp_common::Invocation;

use crate::analyze::NodeProject;
use crate::build::npx_for;

const STANDARD_ENTRIES: &[&str] = &["index.js", "main.js", "server.js", "app.js"];

const KNOWN_ENTRY_POINTS: &[&str] = &[
    "index.js", "index.ts", "server.js", "server.ts", "main.js", "main.ts", "app.js", "app.ts",
    "src/index.js", "src/index.ts", "src/main.js", "src/main.ts",
    "dist/index.js", "dist/main.js",
    "build/index.js", "build/main.js",
    "lib/index.js", "lib/main.js",
];

/// Derive the [`Invocation`] to spawn a just-built server, trying each
/// rule in order and falling back to `node index.js`.
pub fn derive_invocation(
    source_dir: &Path,
    output_dir: Option<&Path>,
    node: Option<&NodeProject>,
    full_name: &str,
) -> Invocation {
    // Rule 1: a standard entry point under the build output dir.
    if let Some(output_dir) = output_dir {
        for entry in STANDARD_ENTRIES {
            if output_dir.join(entry).exists() {
                let rel = output_dir
                    .strip_prefix(source_dir)
                    .unwrap_or(output_dir)
                    .join(entry);
                return Invocation::new(
                    "node",
                    vec![rel.to_string_lossy().into_owned()],
                    source_dir.to_string_lossy(),
                );
            }
        }
    }

    // Rule 2: Node-project fallbacks.
    if let Some(node) = node {
        if let Some(bin) = &node.bin {
            let bin_name = bin
                .as_object()
                .and_then(|m| m.keys().next().cloned())
                .or_else(|| bin.as_str().map(|_| full_name.to_string()));
            if let Some(bin_name) = bin_name {
                return Invocation::new(
                    npx_for(node.package_manager),
                    vec![bin_name],
                    source_dir.to_string_lossy(),
                );
            }
        }
        if node.scripts.contains_key("start") {
            let pm = match node.package_manager {
                crate::analyze::PackageManager::Yarn => "yarn",
                crate::analyze::PackageManager::Pnpm => "pnpm",
                crate::analyze::PackageManager::Bun => "bun",
                crate::analyze::PackageManager::Npm => "npm",
            };
            return Invocation::new(pm, vec!["start".to_string()], source_dir.to_string_lossy());
        }
        if full_name.starts_with('@') && full_name.contains('/') {
            let cwd = std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| ".".to_string());
            return Invocation::new("npx", vec!["-y".to_string(), full_name.to_string()], cwd);
        }
    }

    // Rule 3: a known entry point under the source tree.
    for entry in KNOWN_ENTRY_POINTS {
        if source_dir.join(entry).exists() {
            let command = if entry.ends_with(".ts") { "ts-node" } else { "node" };
            return Invocation::new(command, vec![entry.to_string()], source_dir.to_string_lossy());
        }
    }

    // Rule 4: final fallback.
    Invocation::new("node", vec!["index.js".to_string()], source_dir.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn prefers_standard_entry_under_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dist");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("index.js"), "").unwrap();

        let invocation = derive_invocation(dir.path(), Some(&output), None, "my-server");
        assert_eq!(invocation.command, "node");
        assert_eq!(invocation.args, vec!["dist/index.js".to_string()]);
    }

    #[test]
    fn falls_back_to_npm_start_when_no_output_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripts = HashMap::new();
        scripts.insert("start".to_string(), "node server.js".to_string());
        let node = NodeProject {
            package_manager: crate::analyze::PackageManager::Npm,
            dependencies: vec![],
            dev_dependencies: vec![],
            scripts,
            bin: None,
        };
        let invocation = derive_invocation(dir.path(), None, Some(&node), "my-server");
        assert_eq!(invocation.command, "npm");
        assert_eq!(invocation.args, vec!["start".to_string()]);
    }

    #[test]
    fn falls_back_to_known_entry_point_in_source_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.js"), "").unwrap();
        let invocation = derive_invocation(dir.path(), None, None, "my-server");
        assert_eq!(invocation.command, "node");
        assert_eq!(invocation.args, vec!["server.js".to_string()]);
    }

    #[test]
    fn final_fallback_is_node_index_js() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = derive_invocation(dir.path(), None, None, "my-server");
        assert_eq!(invocation.command, "node");
        assert_eq!(invocation.args, vec!["index.js".to_string()]);
    }
}
