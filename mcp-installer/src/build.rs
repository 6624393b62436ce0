//! Dependency install, build, and build output validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyze::{BuildSystem, NodeProject, PackageManager};
use crate::command::CommandRunner;
use crate::error::{InstallError, InstallResult};

/// Step 5: run the package manager's install command for a Node project,
/// or `pip install -r requirements.txt` then `pip install -e .` for a
/// Python project. A dependency-install failure is tolerated: logged as a
/// warning via the returned bool, not a hard error.
pub async fn install_dependencies(
    root: &Path,
    node: Option<&NodeProject>,
    is_python: bool,
    runner: &dyn CommandRunner,
    timeout: Duration,
) -> bool {
    if let Some(node) = node {
        let command = node.package_manager.install_command();
        let args: Vec<&str> = command[1..].to_vec();
        return runner
            .run(command[0], &args, root, timeout)
            .await
            .map(|o| o.success())
            .unwrap_or(false);
    }
    if is_python {
        let requirements = root.join("requirements.txt");
        let mut ok = true;
        if requirements.exists() {
            ok = runner
                .run("pip", &["install", "-r", "requirements.txt"], root, timeout)
                .await
                .map(|o| o.success())
                .unwrap_or(false);
        }
        let setup_ok = runner
            .run("pip", &["install", "-e", "."], root, timeout)
            .await
            .map(|o| o.success())
            .unwrap_or(false);
        return ok || setup_ok;
    }
    true
}

/// Step 6: try each of the build system's candidate commands until one
/// succeeds, bounded by `build_timeout` per command; then locate the
/// output directory by trying each candidate in order.
pub async fn run_build(
    root: &Path,
    system: BuildSystem,
    runner: &dyn CommandRunner,
    build_timeout: Duration,
) -> InstallResult<PathBuf> {
    let mut tried = Vec::new();
    let mut succeeded = false;
    for command in system.build_commands() {
        tried.push(command.join(" "));
        let args = &command[1..];
        match runner.run(command[0], args, root, build_timeout).await {
            Ok(output) if output.success() => {
                succeeded = true;
                break;
            }
            _ => continue,
        }
    }
    if !succeeded {
        return Err(InstallError::BuildFailed { commands: tried });
    }

    for candidate in system.output_dirs() {
        let path = root.join(candidate);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(InstallError::OutputDirMissing {
        candidates: system.output_dirs().iter().map(|s| s.to_string()).collect(),
    })
}

/// Step 7: the output directory must exist and be non-empty. For Node
/// projects, absence of any standard entry point is a warning (returned
/// as `Some(message)`), never a failure.
pub fn validate_build_output(output_dir: &Path, is_node: bool) -> InstallResult<Option<String>> {
    if !output_dir.exists() {
        return Err(InstallError::OutputDirMissing {
            candidates: vec![output_dir.display().to_string()],
        });
    }
    let mut entries = std::fs::read_dir(output_dir)?;
    if entries.next().is_none() {
        return Err(InstallError::OutputDirEmpty(output_dir.display().to_string()));
    }

    if is_node {
        const STANDARD_ENTRIES: &[&str] = &["index.js", "main.js", "server.js", "app.js"];
        let has_one = STANDARD_ENTRIES.iter().any(|e| output_dir.join(e).exists());
        if !has_one {
            return Ok(Some(format!(
                "none of {STANDARD_ENTRIES:?} found at build output root {output_dir:?}"
            )));
        }
    }
    Ok(None)
}

/// Used by [`crate::derive`] to know which package manager's `npx`
/// equivalent to reach for when falling back to `bin`/scoped-package
/// invocation.
pub fn npx_for(package_manager: PackageManager) -> &'static str {
    match package_manager {
        PackageManager::Bun => "bunx",
        _ => "npx",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::FakeCommandRunner;

    #[tokio::test]
    async fn run_build_tries_commands_in_order_until_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        let runner = FakeCommandRunner::new();
        runner.on(
            "npm",
            &["run", "build"],
            crate::command::FakeInvocation {
                status: 1,
                stdout: String::new(),
                stderr: "no build script".to_string(),
            },
        );
        runner.on_success("yarn", &["build"]);

        let output_dir = run_build(dir.path(), BuildSystem::TypeScript, &runner, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(output_dir, dir.path().join("dist"));
    }

    #[tokio::test]
    async fn run_build_fails_when_all_commands_fail() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeCommandRunner::new();
        let err = run_build(dir.path(), BuildSystem::Rust, &runner, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::BuildFailed { .. }));
    }

    #[test]
    fn validate_build_output_warns_without_standard_entrypoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bundle.js"), "x").unwrap();
        let warning = validate_build_output(dir.path(), true).unwrap();
        assert!(warning.is_some());
    }

    #[test]
    fn validate_build_output_fails_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_build_output(dir.path(), false).unwrap_err();
        assert!(matches!(err, InstallError::OutputDirEmpty(_)));
    }
}
