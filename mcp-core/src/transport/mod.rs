//! The peer transport: owns exactly one child process and a bidirectional
//! newline-delimited JSON stream over its stdio.

mod stdio;

pub use stdio::StdioTransport;

use crate::envelope::{JsonRpcNotification, JsonRpcRequest, RequestId, RpcEnvelope};
use crate::error::McpResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub use mcp_common::Invocation;

/// A notification or out-of-band envelope the transport has received that
/// is not a response to a pending call, delivered to whoever owns the
/// transport (normally a Peer Session) through `receive`.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Envelope(RpcEnvelope),
    /// A stdout line that did not start with `{` or `[`.
    NonJsonOutput(String),
    /// A stdout line that looked like JSON (started with `{`/`[`) but
    /// failed to parse.
    MalformedJson { prefix: String },
    /// A stderr line, already classified as informational or an error by
    /// the transport.
    StderrLine { line: String, is_error: bool },
    /// The child process exited.
    ProcessExited { code: Option<i32>, signal: Option<i32> },
}

pub type InboundReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// Public contract for a Peer Transport, implemented by `StdioTransport`
/// and any future transport kind.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Launch the process with stdio pipes on all three streams; install
    /// readers on stdout and stderr. Returns once the OS accepts the
    /// spawn, not once the peer is ready.
    async fn spawn(&mut self, invocation: &Invocation) -> McpResult<()>;

    /// Assign a fresh id, register a pending call, write one line to
    /// stdin, and suspend until the matching response, the deadline, or
    /// teardown.
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Duration,
    ) -> McpResult<serde_json::Value>;

    /// Fire-and-forget write of a notification envelope.
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> McpResult<()>;

    /// SIGTERM, wait up to 5s, escalate to SIGKILL, join reader tasks,
    /// reject all outstanding pending calls with `ConnectionClosed`.
    async fn close(&mut self) -> McpResult<()>;

    fn is_connected(&self) -> bool;

    fn pid(&self) -> Option<u32>;
}

/// Helper for constructing the envelopes a transport writes to stdin; kept
/// free of transport state so it can be unit tested without a process.
pub fn build_request(id: i64, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
    JsonRpcRequest::new(RequestId::Number(id), method, params)
}

pub fn build_notification(method: &str, params: Option<serde_json::Value>) -> JsonRpcNotification {
    JsonRpcNotification::new(method, params)
}
