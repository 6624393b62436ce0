//! The durable [`ServerRecord`] and volatile [`ServerStatus`] that together
//! describe one installed MCP server, plus the [`Invocation`] used to spawn
//! its process.
//!
//! Both records are plain value types: the Registry replaces them wholesale
//! on every mutation (copy-on-write) rather than mutating fields in place,
//! so a reader holding a clone never observes a half-written update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default bound on automatic reconnection attempts before a Peer Session
/// latches in `error` state.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// The command, arguments, working directory, and environment overlay used
/// to spawn a peer process. All paths are absolute; for a source tree built
/// in place, `cwd` is the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Invocation {
    pub fn new(command: impl Into<String>, args: Vec<String>, cwd: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: cwd.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// How a server's source was obtained, carried on the durable record so a
/// later `update` knows which installer strategy to re-run.
///
/// The `legacy-npm` / `legacy-pip` / `legacy-git` tags correspond to install
/// paths that historically routed to their own wrappers; here they route
/// through the same installer and are kept purely as provenance, never as a
/// branch in installer logic (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMethod {
    Enhanced,
    LegacyNpm,
    LegacyPip,
    LegacyGit,
    Manual,
}

/// The durable description of an installed server. Created by the
/// Installer, mutated only by the Registry, destroyed on uninstall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Must match `[A-Za-z0-9_-]+`; immutable once created.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub invocation: Invocation,
    pub install_method: InstallMethod,
    pub install_url: String,
    #[serde(default)]
    pub metadata: ServerMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The metadata bag on a [`ServerRecord`]: everything the Installer and
/// Registry need that isn't part of the invocation itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_risk_level: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
}

impl ServerRecord {
    /// The character class an id must satisfy: non-empty, ASCII
    /// alphanumeric plus `_`/`-`. Checked by the Registry's `add`
    /// validation before a record is ever persisted.
    pub fn id_is_valid(id: &str) -> bool {
        !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The runtime state of a Peer Session, as tracked by the Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Reconnecting,
    Error,
}

impl Default for PeerState {
    fn default() -> Self {
        PeerState::Stopped
    }
}

/// The volatile runtime state associated with a [`ServerRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    pub state: PeerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stopped: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub version_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ServerStatus {
    /// Apply a state transition, stamping the relevant timestamp for
    /// `running`/`stopped`/`error` and bumping the relevant counter.
    pub fn transition_to(&mut self, state: PeerState, detail: Option<String>) {
        let now = Utc::now();
        match state {
            PeerState::Running => self.last_started = Some(now),
            PeerState::Stopped => self.last_stopped = Some(now),
            PeerState::Error => {
                self.error_count += 1;
                self.last_error = detail.clone();
            }
            _ => {}
        }
        self.state = state;
        self.last_updated = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_validation_accepts_word_chars_and_dashes() {
        assert!(ServerRecord::id_is_valid("my-server_1"));
        assert!(!ServerRecord::id_is_valid(""));
        assert!(!ServerRecord::id_is_valid("my server"));
        assert!(!ServerRecord::id_is_valid("../etc"));
    }

    #[test]
    fn status_transition_to_error_increments_counter_and_sets_message() {
        let mut status = ServerStatus::default();
        status.transition_to(PeerState::Error, Some("boom".to_string()));
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert_eq!(status.state, PeerState::Error);
    }

    #[test]
    fn status_transition_to_running_sets_last_started() {
        let mut status = ServerStatus::default();
        assert!(status.last_started.is_none());
        status.transition_to(PeerState::Running, None);
        assert!(status.last_started.is_some());
    }
}
