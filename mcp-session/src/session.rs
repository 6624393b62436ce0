//! Peer Session: turns a Peer Transport into an MCP peer — handshake,
//! version negotiation, capability cache, and the reconnect policy.
//!
//! `PeerSession::start` hands off to a background supervisor task that
//! owns the reconnect loop for the session's lifetime, republishing
//! lifecycle transitions as `ManagerEvent`s.

use crate::config::SessionConfig;
use crate::descriptors::{parse_prompts, parse_resources, parse_tools, CapabilityCache};
use crate::error::{SessionError, SessionResult};
use mcp_common::{Invocation, ManagerEvent, PeerState};
use mcp_core::{Capability, Implementation, McpError, PeerCapabilities, StdioTransport, VersionCatalog, PeerTransport};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Regex-free classification of stderr/transport faults as connection-class
///: "Only errors matching connection | econnrefused | timeout
/// | network trigger reconnection consideration."
fn is_connection_class_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["connection", "econnrefused", "timeout", "network"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// SIGTERM/SIGINT, the two signals exempted from reconnect
/// eligibility when a process exits.
const SIGTERM: i32 = 15;
const SIGINT: i32 = 2;

fn exit_is_reconnect_eligible(code: Option<i32>, signal: Option<i32>) -> bool {
    if matches!(signal, Some(SIGTERM) | Some(SIGINT)) {
        return false;
    }
    !matches!(code, Some(0) | Some(1))
}

#[derive(Debug, Clone)]
struct SharedState {
    peer_state: PeerState,
    negotiated_version: Option<String>,
    peer_capabilities: Option<PeerCapabilities>,
    cache: CapabilityCache,
    reconnect_attempt: u32,
    /// Set when a non-benign stderr line was observed since the last
    /// `running` transition; resolves the exit-code-1 ambiguity:
    /// a code-1 exit after a fatal stderr line latches `error`, otherwise
    /// `stopped`.
    fatal_stderr_seen: bool,
    pid: Option<u32>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            peer_state: PeerState::Stopped,
            negotiated_version: None,
            peer_capabilities: None,
            cache: CapabilityCache::default(),
            reconnect_attempt: 0,
            fatal_stderr_seen: false,
            pid: None,
        }
    }
}

/// The host-side object that owns one peer over its lifetime, including
/// handshakes and reconnections.
pub struct PeerSession {
    id: String,
    invocation: Invocation,
    catalog: Arc<VersionCatalog>,
    config: SessionConfig,
    transport: Arc<RwLock<StdioTransport>>,
    state: Arc<RwLock<SharedState>>,
    events: broadcast::Sender<ManagerEvent>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl PeerSession {
    pub fn new(
        id: impl Into<String>,
        invocation: Invocation,
        catalog: Arc<VersionCatalog>,
        config: SessionConfig,
    ) -> (Self, broadcast::Receiver<ManagerEvent>) {
        let (events, rx) = broadcast::channel(mcp_common::events::EVENT_CHANNEL_CAPACITY);
        let session = Self {
            id: id.into(),
            invocation,
            catalog,
            config,
            transport: Arc::new(RwLock::new(StdioTransport::new())),
            state: Arc::new(RwLock::new(SharedState::default())),
            events,
            supervisor: std::sync::Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
        };
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> PeerState {
        self.state.read().await.peer_state
    }

    pub async fn negotiated_version(&self) -> Option<String> {
        self.state.read().await.negotiated_version.clone()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.state.read().await.pid
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    /// Perform one connect attempt: spawn a fresh transport, handshake, and
    /// discover capabilities. Does not retry on handshake failure — that is
    /// `start`'s / the supervisor's job, per the fallback-then-latch policy.
    async fn connect_once(&self) -> SessionResult<()> {
        let mut transport = StdioTransport::new();
        transport.spawn(&self.invocation).await?;
        let inbound = transport.take_inbound();
        let pid = transport.pid();

        let negotiated = self.handshake(&transport).await;

        let negotiated = match negotiated {
            Ok(n) => n,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        {
            let mut state = self.state.write().await;
            state.negotiated_version = Some(negotiated.version.clone());
            state.pid = pid;
            state.fatal_stderr_seen = false;
        }

        self.discover_capabilities(&transport, &negotiated.version)
            .await;

        *self.transport.write().await = transport;

        {
            let mut state = self.state.write().await;
            state.peer_state = PeerState::Running;
        }

        self.emit(ManagerEvent::ClientConnected {
            id: self.id.clone(),
            protocol_version: negotiated.version.clone(),
        });
        self.emit(ManagerEvent::VersionNegotiated {
            id: self.id.clone(),
            version: negotiated.version,
            is_backward_compatible: negotiated.is_backward_compatible,
        });

        self.spawn_supervisor(inbound);
        Ok(())
    }

    /// `initialize` with the host's preferred version; on failure, iterate
    /// `supportedVersions()` until one succeeds or all are exhausted (fallback).
    async fn handshake(&self, transport: &StdioTransport) -> SessionResult<mcp_core::Negotiated> {
        let preferred = mcp_core::PROTOCOL_VERSION;
        match self.try_initialize(transport, preferred).await {
            Ok(negotiated) => Ok(negotiated),
            Err(primary_err) => {
                warn!(version = preferred, error = %primary_err, "primary handshake failed, trying fallback versions");
                let mut attempted = 1;
                for version in self.catalog.supported_versions() {
                    if version == preferred {
                        continue;
                    }
                    self.emit(ManagerEvent::VersionFallbackAttempt {
                        id: self.id.clone(),
                        version: version.to_string(),
                    });
                    attempted += 1;
                    if let Ok(negotiated) = self.try_initialize(transport, version).await {
                        self.emit(ManagerEvent::VersionFallbackSuccess {
                            id: self.id.clone(),
                            version: negotiated.version.clone(),
                        });
                        return Ok(negotiated);
                    }
                }
                self.emit(ManagerEvent::VersionNegotiationError {
                    id: self.id.clone(),
                    message: primary_err.to_string(),
                });
                Err(SessionError::HandshakeExhausted { attempted })
            }
        }
    }

    async fn try_initialize(
        &self,
        transport: &StdioTransport,
        version: &str,
    ) -> SessionResult<mcp_core::Negotiated> {
        let params = self
            .catalog
            .build_initialize_params(version, &self.config.client_info);
        let result = transport
            .call("initialize", Some(params), self.config.request_deadline)
            .await?;

        let peer_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                result
                    .get("capabilities")
                    .and_then(|c| c.get("protocolVersions"))
                    .and_then(|v| v.as_array())
                    .and_then(|arr| arr.first())
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| version.to_string());

        let negotiated = self
            .catalog
            .negotiate(&[peer_version])
            .map_err(mcp_core::McpError::from)?;

        if negotiated.version != version {
            let reissued = self
                .catalog
                .build_initialize_params(&negotiated.version, &self.config.client_info);
            transport
                .call("initialize", Some(reissued), self.config.request_deadline)
                .await?;
        }

        transport
            .notify("initialized", Some(json!({})))
            .await?;

        let peer_caps: PeerCapabilities = result
            .get("capabilities")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or(None)
            .unwrap_or_default();
        self.state.write().await.peer_capabilities = Some(peer_caps);

        Ok(negotiated)
    }

    /// `tools/list` / `resources/list` / `prompts/list`, gated by the
    /// negotiated version's capability set *and* the peer's declared
    /// capabilities. Failures here are warnings, not fatal.
    async fn discover_capabilities(&self, transport: &StdioTransport, version: &str) {
        let peer_caps = self.state.read().await.peer_capabilities.clone();
        let mut cache = CapabilityCache::default();

        for (capability, method, key) in [
            (Capability::Tools, "tools/list", "tools"),
            (Capability::Resources, "resources/list", "resources"),
            (Capability::Prompts, "prompts/list", "prompts"),
        ] {
            let version_enabled = self
                .catalog
                .capabilities_of(version)
                .map(|features| features.contains(&capability))
                .unwrap_or(false);
            let peer_enabled = peer_caps
                .as_ref()
                .map(|c| c.declares(capability))
                .unwrap_or(false);
            if !(version_enabled && peer_enabled) {
                continue;
            }
            match transport
                .call(method, None, self.config.request_deadline)
                .await
            {
                Ok(result) => match key {
                    "tools" => cache.tools = parse_tools(result),
                    "resources" => cache.resources = parse_resources(result),
                    "prompts" => cache.prompts = parse_prompts(result),
                    _ => unreachable!(),
                },
                Err(e) => warn!(id = %self.id, %method, error = %e, "capability discovery failed (non-fatal)"),
            }
        }

        self.state.write().await.cache = cache;
    }

    /// Spawn the background task that watches this connection's inbound
    /// events (stderr, malformed JSON, process exit, peer notifications)
    /// and drives the reconnect policy.
    fn spawn_supervisor(&self, inbound: Option<mcp_core::transport::InboundReceiver>) {
        let Some(mut inbound) = inbound else { return };
        let id = self.id.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let stopping = self.stopping.clone();
        let invocation = self.invocation.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let transport = self.transport.clone();

        let handle = tokio::spawn(async move {
            use mcp_core::transport::InboundEvent;

            loop {
                let event = match inbound.recv().await {
                    Some(e) => e,
                    None => break,
                };

                match event {
                    InboundEvent::StderrLine { line, is_error } => {
                        if is_error {
                            state.write().await.fatal_stderr_seen = true;
                            let _ = events.send(ManagerEvent::StderrOutput {
                                id: id.clone(),
                                line: line.clone(),
                                is_error: true,
                            });
                            if is_connection_class_text(&line) && !stopping.load(Ordering::SeqCst) {
                                let attempt = state.read().await.reconnect_attempt;
                                if attempt < config.max_reconnect_attempts {
                                    if let Some(new_inbound) = reconnect(
                                        &id, &state, &events, &stopping, &invocation, &catalog,
                                        &config, &transport,
                                    )
                                    .await
                                    {
                                        inbound = new_inbound;
                                    }
                                } else {
                                    let mut s = state.write().await;
                                    s.peer_state = PeerState::Error;
                                    let _ = events.send(ManagerEvent::ClientError {
                                        id: id.clone(),
                                        message: format!(
                                            "max reconnect attempts ({}) exceeded",
                                            config.max_reconnect_attempts
                                        ),
                                    });
                                }
                            }
                        } else {
                            let _ = events.send(ManagerEvent::StderrOutput {
                                id: id.clone(),
                                line,
                                is_error: false,
                            });
                        }
                    }
                    InboundEvent::NonJsonOutput(line) => {
                        let _ = events.send(ManagerEvent::NonJsonOutput {
                            id: id.clone(),
                            line,
                        });
                    }
                    InboundEvent::MalformedJson { prefix } => {
                        warn!(id = %id, %prefix, "malformed JSON from peer stdout");
                    }
                    InboundEvent::Envelope(mcp_core::RpcEnvelope::Notification(n)) => {
                        let negotiated = state.read().await.negotiated_version.clone();
                        let notifications_enabled = negotiated
                            .as_ref()
                            .and_then(|v| catalog.capabilities_of(v).ok())
                            .map(|f| f.contains(&Capability::Notifications))
                            .unwrap_or(false);
                        if notifications_enabled {
                            let ev = match n.method.as_str() {
                                "notifications/tools/list_changed" => {
                                    Some(ManagerEvent::ToolsListChanged { id: id.clone() })
                                }
                                "notifications/resources/list_changed" => {
                                    Some(ManagerEvent::ResourcesListChanged { id: id.clone() })
                                }
                                "notifications/prompts/list_changed" => {
                                    Some(ManagerEvent::PromptsListChanged { id: id.clone() })
                                }
                                other => Some(ManagerEvent::PeerNotification {
                                    id: id.clone(),
                                    method: other.to_string(),
                                }),
                            };
                            if let Some(ev) = ev {
                                let _ = events.send(ev);
                            }
                        }
                    }
                    InboundEvent::Envelope(_) => {}
                    InboundEvent::ProcessExited { code, signal } => {
                        if stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        let eligible = exit_is_reconnect_eligible(code, signal);
                        if eligible {
                            let attempt = state.read().await.reconnect_attempt;
                            if attempt < config.max_reconnect_attempts {
                                if let Some(new_inbound) = reconnect(
                                    &id, &state, &events, &stopping, &invocation, &catalog, &config,
                                    &transport,
                                )
                                .await
                                {
                                    inbound = new_inbound;
                                    continue;
                                }
                            } else {
                                let mut s = state.write().await;
                                s.peer_state = PeerState::Error;
                                let _ = events.send(ManagerEvent::ClientError {
                                    id: id.clone(),
                                    message: format!(
                                        "max reconnect attempts ({}) exceeded",
                                        config.max_reconnect_attempts
                                    ),
                                });
                            }
                        } else {
                            let fatal_stderr = state.read().await.fatal_stderr_seen;
                            let mut s = state.write().await;
                            s.peer_state = if fatal_stderr {
                                PeerState::Error
                            } else {
                                PeerState::Stopped
                            };
                        }
                        break;
                    }
                }
            }
            debug!(id = %id, "session supervisor task exiting");
        });

        *self.supervisor.lock().unwrap() = Some(handle);
    }

    /// Initial connect from `stopped`: one handshake attempt, no automatic
    /// retry on failure — the caller (Manager) decides whether to retry.
    pub async fn start(&self) -> SessionResult<()> {
        if matches!(self.state().await, PeerState::Running) {
            return Ok(());
        }
        self.stopping.store(false, Ordering::SeqCst);
        self.state.write().await.peer_state = PeerState::Starting;
        match self.connect_once().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = self.state.write().await;
                state.peer_state = PeerState::Error;
                drop(state);
                self.emit(ManagerEvent::ClientError {
                    id: self.id.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub async fn stop(&self) -> SessionResult<()> {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.supervisor.lock().unwrap().take() {
            handle.abort();
        }
        self.transport.write().await.close().await?;
        self.state.write().await.peer_state = PeerState::Stopped;
        self.emit(ManagerEvent::ClientDisconnected {
            id: self.id.clone(),
        });
        Ok(())
    }

    async fn ensure_running(&self) -> SessionResult<()> {
        if self.state().await != PeerState::Running {
            return Err(SessionError::Core(McpError::NotConnected));
        }
        Ok(())
    }

    pub async fn list_tools(&self) -> SessionResult<Vec<crate::descriptors::ToolDescriptor>> {
        self.ensure_running().await?;
        let version = self.negotiated_version().await.unwrap_or_default();
        self.validate_outgoing("tools/list", &version)?;
        let result = self
            .transport
            .read()
            .await
            .call("tools/list", None, self.config.request_deadline)
            .await?;
        let tools = parse_tools(result);
        self.state.write().await.cache.tools = tools.clone();
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> SessionResult<Value> {
        self.ensure_running().await?;
        if !self.state.read().await.cache.has_tool(name) {
            self.list_tools().await?;
            if !self.state.read().await.cache.has_tool(name) {
                return Err(SessionError::Core(McpError::NotFound(name.to_string())));
            }
        }
        let version = self.negotiated_version().await.unwrap_or_default();
        self.validate_outgoing("tools/call", &version)?;
        let result = self
            .transport
            .read()
            .await
            .call(
                "tools/call",
                Some(json!({"name": name, "arguments": args})),
                self.config.request_deadline,
            )
            .await?;
        self.emit(ManagerEvent::ToolCalled {
            id: self.id.clone(),
            name: name.to_string(),
        });
        Ok(result)
    }

    pub async fn list_resources(&self) -> SessionResult<Vec<crate::descriptors::ResourceDescriptor>> {
        self.ensure_running().await?;
        let version = self.negotiated_version().await.unwrap_or_default();
        self.validate_outgoing("resources/list", &version)?;
        let result = self
            .transport
            .read()
            .await
            .call("resources/list", None, self.config.request_deadline)
            .await?;
        let resources = parse_resources(result);
        self.state.write().await.cache.resources = resources.clone();
        Ok(resources)
    }

    pub async fn read_resource(&self, uri: &str) -> SessionResult<Value> {
        self.ensure_running().await?;
        let version = self.negotiated_version().await.unwrap_or_default();
        self.validate_outgoing("resources/read", &version)?;
        let result = self
            .transport
            .read()
            .await
            .call(
                "resources/read",
                Some(json!({"uri": uri})),
                self.config.request_deadline,
            )
            .await?;
        self.emit(ManagerEvent::ResourceRead {
            id: self.id.clone(),
            uri: uri.to_string(),
        });
        Ok(result)
    }

    pub async fn list_prompts(&self) -> SessionResult<Vec<crate::descriptors::PromptDescriptor>> {
        self.ensure_running().await?;
        let version = self.negotiated_version().await.unwrap_or_default();
        self.validate_outgoing("prompts/list", &version)?;
        let result = self
            .transport
            .read()
            .await
            .call("prompts/list", None, self.config.request_deadline)
            .await?;
        let prompts = parse_prompts(result);
        self.state.write().await.cache.prompts = prompts.clone();
        Ok(prompts)
    }

    pub async fn get_prompt(&self, name: &str, args: Value) -> SessionResult<Value> {
        self.ensure_running().await?;
        if !self.state.read().await.cache.has_prompt(name) {
            self.list_prompts().await?;
            if !self.state.read().await.cache.has_prompt(name) {
                return Err(SessionError::Core(McpError::NotFound(name.to_string())));
            }
        }
        let version = self.negotiated_version().await.unwrap_or_default();
        self.validate_outgoing("prompts/get", &version)?;
        let result = self
            .transport
            .read()
            .await
            .call(
                "prompts/get",
                Some(json!({"name": name, "arguments": args})),
                self.config.request_deadline,
            )
            .await?;
        self.emit(ManagerEvent::PromptRetrieved {
            id: self.id.clone(),
            name: name.to_string(),
        });
        Ok(result)
    }

    /// Run an outgoing request through the Version Catalog's validator
    /// before sending it: errors abort the send, warnings
    /// are logged.
    fn validate_outgoing(&self, method: &str, version: &str) -> SessionResult<()> {
        let envelope = mcp_core::RpcEnvelope::Request(mcp_core::JsonRpcRequest::new(
            mcp_core::RequestId::Number(0),
            method,
            None,
        ));
        let outcome = self.catalog.validate_message(&envelope, version);
        for warning in &outcome.warnings {
            warn!(id = %self.id, %method, %warning, "validation warning");
        }
        if !outcome.ok {
            return Err(SessionError::Core(McpError::ValidationError(
                outcome.errors.join("; "),
            )));
        }
        Ok(())
    }
}

/// Shared reconnect step used both for connection-class stderr and for
/// reconnect-eligible process exits: bump the attempt counter, announce
/// `reconnecting`, back off linearly, then rebuild a fresh transport and
/// repeat the handshake.
#[allow(clippy::too_many_arguments)]
async fn reconnect(
    id: &str,
    state: &Arc<RwLock<SharedState>>,
    events: &broadcast::Sender<ManagerEvent>,
    stopping: &Arc<AtomicBool>,
    invocation: &Invocation,
    catalog: &Arc<VersionCatalog>,
    config: &SessionConfig,
    transport: &Arc<RwLock<StdioTransport>>,
) -> Option<mcp_core::transport::InboundReceiver> {
    let attempt = {
        let mut s = state.write().await;
        s.reconnect_attempt += 1;
        s.peer_state = PeerState::Reconnecting;
        s.reconnect_attempt
    };
    let _ = events.send(ManagerEvent::ClientReconnecting {
        id: id.to_string(),
        attempt,
    });

    let delay = config.reconnect_base_delay * attempt;
    tokio::time::sleep(delay).await;

    // Defend against a race with a manual restart that already brought the
    // session back to `running`.
    if state.read().await.peer_state == PeerState::Running {
        return None;
    }
    if stopping.load(Ordering::SeqCst) {
        return None;
    }

    let mut fresh = StdioTransport::new();
    if let Err(e) = fresh.spawn(invocation).await {
        let mut s = state.write().await;
        s.peer_state = PeerState::Error;
        let _ = events.send(ManagerEvent::ClientError {
            id: id.to_string(),
            message: e.to_string(),
        });
        return None;
    }
    let new_inbound = fresh.take_inbound();
    let pid = fresh.pid();

    let deadline = config.request_deadline;
    let params = catalog.build_initialize_params(mcp_core::PROTOCOL_VERSION, &config.client_info);
    let initialize_result = fresh.call("initialize", Some(params), deadline).await;

    match initialize_result {
        Ok(result) => {
            let peer_version = result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| mcp_core::PROTOCOL_VERSION.to_string());
            match catalog.negotiate(&[peer_version]) {
                Ok(negotiated) => {
                    let _ = fresh.notify("initialized", Some(json!({}))).await;
                    *transport.write().await = fresh;
                    let mut s = state.write().await;
                    s.peer_state = PeerState::Running;
                    s.negotiated_version = Some(negotiated.version.clone());
                    s.pid = pid;
                    s.fatal_stderr_seen = false;
                    drop(s);
                    let _ = events.send(ManagerEvent::ClientConnected {
                        id: id.to_string(),
                        protocol_version: negotiated.version,
                    });
                    info!(id, attempt, "reconnected to peer");
                    new_inbound
                }
                Err(e) => {
                    state.write().await.peer_state = PeerState::Error;
                    let _ = events.send(ManagerEvent::ClientError {
                        id: id.to_string(),
                        message: e.to_string(),
                    });
                    None
                }
            }
        }
        Err(e) => {
            state.write().await.peer_state = PeerState::Error;
            let _ = events.send(ManagerEvent::ClientError {
                id: id.to_string(),
                message: e.to_string(),
            });
            None
        }
    }
}
