//! Error taxonomy shared across the host runtime.
//!
//! `McpError` is the top-level enum every crate in the workspace converges
//! on at its public boundary; `TransportError` and `ProtocolError` are the
//! two component taxonomies owned by this crate, covering the peer
//! transport and the version catalog respectively. `mcp-session`,
//! `mcp-manager`, and `mcp-installer` each add their own component error
//! and fold it into `McpError` via `#[from]`, mirroring this crate's own
//! nesting.

use thiserror::Error;

/// Errors raised by the peer transport: process spawn, pipe I/O, and
/// malformed-but-JSON-shaped wire data.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn peer process: {0}")]
    SpawnFailed(String),

    #[error("broken pipe while communicating with peer: {0}")]
    BrokenPipe(String),

    #[error("unparseable JSON-RPC line (prefix: {prefix:?}): {source}")]
    MalformedJson {
        prefix: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport already closed")]
    AlreadyClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this failure class counts as connection-class for the
    /// reconnection policy: a spawn failure, a broken pipe, or an attempt
    /// to use an already-disconnected transport.
    pub fn is_connection_class(&self) -> bool {
        matches!(
            self,
            TransportError::SpawnFailed(_) | TransportError::BrokenPipe(_) | TransportError::NotConnected
        )
    }
}

/// Errors raised by the version catalog during negotiation or message
/// validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no compatible protocol version with peer-offered versions {offered:?}")]
    NoCompatibleVersion { offered: Vec<String> },

    #[error("unknown protocol version: {0}")]
    UnknownVersion(String),

    #[error("no upgrade path from {from} to {to}")]
    NoUpgradePath { from: String, to: String },

    #[error("message failed validation: {0}")]
    ValidationError(String),
}

/// The top-level error every public operation in this workspace can
/// surface: a kind taxonomy, not a catalog of concrete wire types.
#[derive(Debug, Error)]
pub enum McpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{method} timed out")]
    Timeout { method: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("not connected")]
    NotConnected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("peer error in {method}: {message} (code {code})")]
    PeerError {
        method: String,
        code: i64,
        message: String,
    },

    #[error("validation warning: {0}")]
    ValidationWarning(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    pub fn timeout(method: impl Into<String>) -> Self {
        McpError::Timeout {
            method: method.into(),
        }
    }

    pub fn peer_error(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        McpError::PeerError {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Whether this error is a candidate for the reconnection policy: only
    /// connection-class transport errors qualify.
    pub fn is_reconnect_eligible(&self) -> bool {
        matches!(self, McpError::Transport(t) if t.is_connection_class())
    }
}

pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_spawn_failure_is_reconnect_eligible() {
        let err = McpError::from(TransportError::SpawnFailed("enoent".into()));
        assert!(err.is_reconnect_eligible());
    }

    #[test]
    fn timeout_is_not_reconnect_eligible() {
        let err = McpError::timeout("tools/call");
        assert!(!err.is_reconnect_eligible());
    }

    #[test]
    fn peer_error_message_includes_method() {
        let err = McpError::peer_error("tools/call", -32602, "bad params");
        assert!(err.to_string().contains("tools/call"));
    }
}
