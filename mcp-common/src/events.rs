//! The event fan-out contract observed by the host.
//!
//! `ManagerEvent` is the single observable surface: Registry mutations,
//! Session lifecycle transitions, and Installer progress all republish
//! through it. Exactly the kinds enumerated here form the host UI contract
//! — adding a variant is a breaking change to that contract, not an
//! implementation detail.

use crate::model::{PeerState, ServerRecord};
use serde::{Deserialize, Serialize};

/// One emitted event, always `{ kind, payload }` on the wire; in
/// Rust this is simply an enum so subscribers get exhaustiveness checking
/// instead of string-typed kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ManagerEvent {
    // --- Registry mutations ---
    ServerAdded { record: ServerRecord },
    ServerUpdated { record: ServerRecord },
    ServerRemoved { id: String },
    StatusChanged { id: String, state: PeerState, detail: Option<String> },

    // --- Installer pipeline progress ---
    InstallStarted { install_url: String },
    InstallProgress { install_url: String, stage: String, detail: String },
    InstallCompleted { install_url: String, server_id: String, from_cache: bool },
    InstallFailed { install_url: String, reason: String },

    // --- Manager-level server lifecycle ---
    ServerInstalled { id: String },
    ServerUninstalled { id: String },
    ServerStarting { id: String },
    ServerStarted { id: String, pid: Option<u32>, protocol_version: String },
    ServerStopping { id: String },
    ServerStopped { id: String },
    ServerRestartFailed { id: String, reason: String },

    // --- Peer Session lifecycle ---
    ClientConnected { id: String, protocol_version: String },
    ClientDisconnected { id: String },
    ClientError { id: String, message: String },
    ClientReconnecting { id: String, attempt: u32 },

    // --- Version negotiation ---
    VersionNegotiated { id: String, version: String, is_backward_compatible: bool },
    VersionWarning { id: String, message: String },
    VersionNegotiationError { id: String, message: String },
    VersionFallbackAttempt { id: String, version: String },
    VersionFallbackSuccess { id: String, version: String },

    // --- Per-call observability ---
    ToolCalled { id: String, name: String },
    ResourceRead { id: String, uri: String },
    PromptRetrieved { id: String, name: String },

    // --- Peer-declared list_changed notifications ---
    ToolsListChanged { id: String },
    ResourcesListChanged { id: String },
    PromptsListChanged { id: String },
    /// Any other peer notification, forwarded generically.
    PeerNotification { id: String, method: String },

    // --- Transport hygiene ---
    NonJsonOutput { id: String, line: String },
    StderrOutput { id: String, line: String, is_error: bool },
}

impl ManagerEvent {
    /// The server id this event concerns, where applicable. Installer
    /// progress events (pre-registry) and registry-wide events have none.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            ManagerEvent::ServerAdded { record } | ManagerEvent::ServerUpdated { record } => {
                Some(record.id.as_str())
            }
            ManagerEvent::ServerRemoved { id }
            | ManagerEvent::StatusChanged { id, .. }
            | ManagerEvent::ServerInstalled { id }
            | ManagerEvent::ServerUninstalled { id }
            | ManagerEvent::ServerStarting { id }
            | ManagerEvent::ServerStarted { id, .. }
            | ManagerEvent::ServerStopping { id }
            | ManagerEvent::ServerStopped { id }
            | ManagerEvent::ServerRestartFailed { id, .. }
            | ManagerEvent::ClientConnected { id, .. }
            | ManagerEvent::ClientDisconnected { id }
            | ManagerEvent::ClientError { id, .. }
            | ManagerEvent::ClientReconnecting { id, .. }
            | ManagerEvent::VersionNegotiated { id, .. }
            | ManagerEvent::VersionWarning { id, .. }
            | ManagerEvent::VersionNegotiationError { id, .. }
            | ManagerEvent::VersionFallbackAttempt { id, .. }
            | ManagerEvent::VersionFallbackSuccess { id, .. }
            | ManagerEvent::ToolCalled { id, .. }
            | ManagerEvent::ResourceRead { id, .. }
            | ManagerEvent::PromptRetrieved { id, .. }
            | ManagerEvent::ToolsListChanged { id }
            | ManagerEvent::ResourcesListChanged { id }
            | ManagerEvent::PromptsListChanged { id }
            | ManagerEvent::PeerNotification { id, .. }
            | ManagerEvent::NonJsonOutput { id, .. }
            | ManagerEvent::StderrOutput { id, .. } => Some(id.as_str()),
            ManagerEvent::InstallStarted { .. }
            | ManagerEvent::InstallProgress { .. }
            | ManagerEvent::InstallCompleted { .. }
            | ManagerEvent::InstallFailed { .. } => None,
        }
    }
}

/// A subscription handle for the bounded per-subscriber channel the host
/// reads from: a single `broadcast` sender with one receiver per
/// subscriber. The host subscribes once at initialization and receives
/// events in emission order with no backpressure on the publisher — a slow
/// subscriber's lagged receiver surfaces as a `RecvError::Lagged` the host
/// can count rather than one that blocks every other subscriber.
pub type EventReceiver = tokio::sync::broadcast::Receiver<ManagerEvent>;

/// Bounded channel capacity backing [`EventReceiver`]; chosen generously
/// enough that a subscriber reading once per event loop tick never lags
/// under normal install/start/stop traffic.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
