//! Session-level error taxonomy. Wraps `mcp_core::McpError` (the wire-level
//! failures) and adds the handful of outcomes that only make sense once
//! there's a handshake and a reconnect policy layered on top.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] mcp_core::McpError),

    #[error("handshake failed after exhausting all {attempted} supported versions")]
    HandshakeExhausted { attempted: usize },

    #[error("maximum reconnect attempts ({max}) exceeded")]
    MaxReconnectAttemptsExceeded { max: u32 },

    #[error("operation invoked outside running state (current: {state:?})")]
    NotRunning { state: mcp_common::PeerState },
}

pub type SessionResult<T> = Result<T, SessionError>;
