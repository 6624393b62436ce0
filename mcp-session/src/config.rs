//! Tunables for one Peer Session defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for any single RPC (`call`), including the handshake's
    /// `initialize` round trip. Default 30s.
    pub request_deadline: Duration,
    /// Bound on automatic reconnection attempts before latching `error`.
    /// Default 3.
    pub max_reconnect_attempts: u32,
    /// Base of the linear reconnect back-off: `reconnectDelay * attempt`.
    /// Default 2s.
    pub reconnect_base_delay: Duration,
    pub client_info: mcp_core::Implementation,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(30),
            max_reconnect_attempts: mcp_common::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_secs(2),
            client_info: mcp_core::Implementation::new("mcp-host", env!("CARGO_PKG_VERSION")),
        }
    }
}
