//! `CommandRunner`: an abstraction over running external programs, so
//! tests can inject a fake with deterministic outputs instead of shelling
//! out to `git`/`npm`/`pip`/`tar`/`unzip`/`curl` for real.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::{InstallError, InstallResult};

/// The outcome of running one external command to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a program with the given args in the given directory, relaying
/// stdout/stderr and bounded by a per-command timeout. All installer
/// stages that shell out go through this trait rather than
/// `tokio::process::Command` directly.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> InstallResult<CommandOutput>;
}

/// The production runner: spawns a real child process with piped stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> InstallResult<CommandOutput> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            InstallError::AcquisitionFailed {
                url: program.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let wait = async move {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut pipe) = stdout_pipe.take() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(mut pipe) = stderr_pipe.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let full_command: Vec<String> = std::iter::once(program.to_string())
            .chain(args.iter().map(|a| a.to_string()))
            .collect();

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok((status, stdout, stderr))) => Ok(CommandOutput {
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            }),
            Ok(Err(e)) => Err(InstallError::Io(e)),
            Err(_) => Err(InstallError::CommandTimeout(full_command)),
        }
    }
}

/// A single recorded or expected invocation, used by [`FakeCommandRunner`]
/// in installer tests.
#[derive(Debug, Clone)]
pub struct FakeInvocation {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Deterministic, filesystem-side-effect-free stand-in for
/// [`SystemCommandRunner`], keyed by `"program arg1 arg2"`. Installer
/// tests register canned outputs and optionally a closure that performs
/// the filesystem side effect a real command would have (e.g. writing a
/// fake `dist/index.js` the way `npm run build` would).
pub struct FakeCommandRunner {
    responses: std::sync::Mutex<HashMap<String, FakeInvocation>>,
    pub calls: std::sync::Mutex<Vec<String>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(HashMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn key(program: &str, args: &[&str]) -> String {
        std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ")
    }

    pub fn on(&self, program: &str, args: &[&str], invocation: FakeInvocation) {
        self.responses
            .lock()
            .unwrap()
            .insert(Self::key(program, args), invocation);
    }

    pub fn on_success(&self, program: &str, args: &[&str]) {
        self.on(
            program,
            args,
            FakeInvocation {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
            },
        );
    }
}

impl Default for FakeCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _cwd: &Path,
        _timeout: Duration,
    ) -> InstallResult<CommandOutput> {
        let key = Self::key(program, args);
        self.calls.lock().unwrap().push(key.clone());
        match self.responses.lock().unwrap().get(&key) {
            Some(resp) => Ok(CommandOutput {
                status: resp.status,
                stdout: resp.stdout.clone(),
                stderr: resp.stderr.clone(),
            }),
            None => Err(InstallError::CommandFailed {
                command: std::iter::once(program.to_string())
                    .chain(args.iter().map(|a| a.to_string()))
                    .collect(),
                status: 127,
                stderr: "no fake response registered".to_string(),
            }),
        }
    }
}

/// Directory join helper shared by the acquisition/build stages: resolve
/// `base/rel` without allowing `rel` to escape `base` via `..`, per the
/// URL-safety rule the security gate also enforces.
pub fn safe_join(base: &Path, rel: &str) -> InstallResult<PathBuf> {
    if rel.contains("..") {
        return Err(InstallError::Archive(format!(
            "refusing to join path containing '..': {rel}"
        )));
    }
    Ok(base.join(rel))
}
