//! Stdio-based Peer Transport: one child process, three tokio tasks (stdin
//! writer, stdout reader, stderr reader), and an id-keyed map of pending
//! calls. Generalized from a client-proxy transport that spoke the same
//! newline-delimited JSON-RPC framing.

use super::{InboundEvent, Invocation, PeerTransport};
use crate::envelope::{JsonRpcRequest, JsonRpcResponse, RequestId, RpcEnvelope};
use crate::error::{McpError, McpResult, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// Stderr prefixes routinely emitted by package managers and peers that
/// should not be treated as faults.
const BENIGN_STDERR_PREFIXES: &[&str] = &[
    "npm WARN",
    "npm notice",
    "npm info",
    "added ",
    "audited ",
    "found 0 vulnerabilities",
    "up to date",
];

fn is_benign_stderr(line: &str) -> bool {
    BENIGN_STDERR_PREFIXES.iter().any(|p| line.starts_with(p)) || line.contains("running on stdio")
}

pub struct StdioTransport {
    pid: Option<u32>,
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
    pending: PendingMap,
    next_id: Arc<AtomicI64>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: Option<mpsc::UnboundedReceiver<InboundEvent>>,
    connected: Arc<AtomicBool>,
    /// Fired by the exit-watcher task once the child has been reaped, so
    /// `close()` can wait for natural exit before escalating to SIGKILL
    /// without needing to share ownership of the `Child` handle.
    exited: Arc<Notify>,
    reader_handle: Option<JoinHandle<()>>,
    stderr_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    wait_handle: Option<JoinHandle<()>>,
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            pid: None,
            stdin_tx: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            connected: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(Notify::new()),
            reader_handle: None,
            stderr_handle: None,
            writer_handle: None,
            wait_handle: None,
        }
    }

    /// Take ownership of the inbound event stream. Call once, right after
    /// `spawn`; a second call returns `None`.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<InboundEvent>> {
        self.inbound_rx.take()
    }
}

#[async_trait]
impl PeerTransport for StdioTransport {
    async fn spawn(&mut self, invocation: &Invocation) -> McpResult<()> {
        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| McpError::from(TransportError::SpawnFailed(e.to_string())))?;

        self.pid = child.id();
        info!(pid = ?self.pid, command = %invocation.command, "spawned peer process");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::from(TransportError::SpawnFailed("no stdin pipe".into())))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::from(TransportError::SpawnFailed("no stdout pipe".into())))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::from(TransportError::SpawnFailed("no stderr pipe".into())))?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        self.stdin_tx = Some(stdin_tx);

        // Writer task: serializes all stdin writes.
        self.writer_handle = Some(tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(error = %e, "failed to write to peer stdin");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!(error = %e, "failed to flush peer stdin");
                    break;
                }
            }
        }));

        // Reader task: drains stdout, matches responses, forwards the rest.
        let pending = self.pending.clone();
        let inbound_tx = self.inbound_tx.clone();
        self.reader_handle = Some(tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("peer stdout closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
                            let _ = inbound_tx
                                .send(InboundEvent::NonJsonOutput(trimmed.to_string()));
                            continue;
                        }
                        match serde_json::from_str::<RpcEnvelope>(trimmed) {
                            Ok(RpcEnvelope::Response(response)) => {
                                if let RequestId::Number(id) = response.id {
                                    let sender = pending.lock().await.remove(&id);
                                    if let Some(sender) = sender {
                                        let _ = sender.send(response);
                                    }
                                } else {
                                    let _ = inbound_tx
                                        .send(InboundEvent::Envelope(RpcEnvelope::Response(response)));
                                }
                            }
                            Ok(other) => {
                                let _ = inbound_tx.send(InboundEvent::Envelope(other));
                            }
                            Err(_) => {
                                let prefix: String = trimmed.chars().take(80).collect();
                                warn!(%prefix, "stdout line looked like JSON but failed to parse");
                                let _ = inbound_tx.send(InboundEvent::MalformedJson { prefix });
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read peer stdout");
                        break;
                    }
                }
            }
        }));

        // Stderr task: classify lines, forward all of them for the Session
        // to log, but only flag the non-benign ones as errors.
        let inbound_tx_stderr = self.inbound_tx.clone();
        self.stderr_handle = Some(tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim().to_string();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let is_error = !is_benign_stderr(&trimmed);
                        if is_error {
                            warn!(line = %trimmed, "peer stderr");
                        } else {
                            debug!(line = %trimmed, "peer stderr (benign)");
                        }
                        let _ = inbound_tx_stderr.send(InboundEvent::StderrLine {
                            line: trimmed,
                            is_error,
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read peer stderr");
                        break;
                    }
                }
            }
        }));

        // Exit watcher: rejects pending calls and reports exit status.
        let mut child_for_wait = child;
        let pending_on_exit = self.pending.clone();
        let inbound_tx_exit = self.inbound_tx.clone();
        let connected_flag = self.connected.clone();
        let exited = self.exited.clone();
        self.wait_handle = Some(tokio::spawn(async move {
            let status = child_for_wait.wait().await;
            connected_flag.store(false, Ordering::SeqCst);
            pending_on_exit.lock().await.clear();
            let (code, signal) = match status {
                Ok(status) => (status.code(), unix_signal(&status)),
                Err(_) => (None, None),
            };
            info!(?code, ?signal, "peer process exited");
            let _ = inbound_tx_exit.send(InboundEvent::ProcessExited { code, signal });
            exited.notify_waiters();
        }));

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Duration,
    ) -> McpResult<serde_json::Value> {
        if !self.is_connected() {
            return Err(McpError::from(TransportError::NotConnected));
        }
        let stdin_tx = self
            .stdin_tx
            .as_ref()
            .ok_or_else(|| McpError::from(TransportError::NotConnected))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(RequestId::Number(id), method, params);

        let (tx, rx) = oneshot::channel();
        // Registered before any byte of the request is written.
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&request)? + "\n";
        if stdin_tx.send(line).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::from(TransportError::BrokenPipe(
                "stdin writer task gone".into(),
            )));
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    Err(McpError::peer_error(method, error.code, error.message))
                } else {
                    Ok(response.result.unwrap_or(serde_json::Value::Null))
                }
            }
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::timeout(method))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::from(TransportError::NotConnected));
        }
        let stdin_tx = self
            .stdin_tx
            .as_ref()
            .ok_or_else(|| McpError::from(TransportError::NotConnected))?;
        let notification = crate::envelope::JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notification)? + "\n";
        stdin_tx
            .send(line)
            .map_err(|_| McpError::from(TransportError::BrokenPipe("stdin writer task gone".into())))
    }

    async fn close(&mut self) -> McpResult<()> {
        let already_exited = !self.connected.swap(false, Ordering::SeqCst);

        if !already_exited {
            #[cfg(unix)]
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }

            let waited =
                tokio::time::timeout(Duration::from_secs(5), self.exited.notified()).await;
            if waited.is_err() {
                #[cfg(unix)]
                if let Some(pid) = self.pid {
                    unsafe {
                        libc::kill(pid as i32, libc::SIGKILL);
                    }
                }
                let _ = tokio::time::timeout(Duration::from_secs(2), self.exited.notified()).await;
            }
        }

        self.stdin_tx.take();
        for handle in [
            self.reader_handle.take(),
            self.stderr_handle.take(),
            self.writer_handle.take(),
            self.wait_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }

        self.pending.lock().await.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(unix)]
fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn unix_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_stderr_recognizes_package_manager_noise() {
        assert!(is_benign_stderr("npm WARN deprecated package"));
        assert!(is_benign_stderr("found 0 vulnerabilities"));
        assert!(is_benign_stderr("Server running on stdio"));
        assert!(!is_benign_stderr("TypeError: cannot read property 'x'"));
    }

    #[tokio::test]
    async fn spawn_failure_on_missing_command_is_reported() {
        let mut transport = StdioTransport::new();
        let invocation = Invocation {
            command: "/nonexistent/mcp-server-binary".to_string(),
            args: vec![],
            cwd: ".".to_string(),
            env: HashMap::new(),
        };
        let result = transport.spawn(&invocation).await;
        assert!(result.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn call_before_spawn_fails_not_connected() {
        let transport = StdioTransport::new();
        let result = transport.call("tools/list", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(McpError::Transport(TransportError::NotConnected))));
    }

    #[tokio::test]
    async fn echo_round_trip_over_cat() {
        // `cat` echoes stdin to stdout verbatim, which lets us exercise the
        // framing and correlation logic without a real MCP peer: a
        // request line comes back byte-for-byte as a "response" only if we
        // feed it a pre-built response instead. Here we simply confirm the
        // transport reaches the connected state and can be torn down
        // cleanly, since `cat` cannot answer JSON-RPC semantically.
        let mut transport = StdioTransport::new();
        let invocation = Invocation {
            command: "cat".to_string(),
            args: vec![],
            cwd: ".".to_string(),
            env: HashMap::new(),
        };
        if transport.spawn(&invocation).await.is_ok() {
            assert!(transport.is_connected());
            transport.close().await.unwrap();
            assert!(!transport.is_connected());
        }
    }
}
