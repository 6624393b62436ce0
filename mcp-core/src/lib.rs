//! # MCP Core
//!
//! `mcp-core` is the foundation the rest of the host runtime builds on: the
//! JSON-RPC 2.0 wire [`envelope`] types, the [`capabilities`] exchanged
//! during the handshake, the immutable [`catalog`] of known protocol
//! versions, the per-peer [`transport`] that owns one child process, and
//! the workspace-wide [`error`] taxonomy every other crate folds into.
//!
//! Nothing in this crate knows about reconnection policy, a server
//! registry, or installation — those live in `mcp-session` and
//! `mcp-manager`/`mcp-installer` respectively, layered on top.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod capabilities;
pub mod catalog;
pub mod envelope;
pub mod error;
pub mod transport;

pub use capabilities::{Capability, Implementation, PeerCapabilities, VersionDescriptor};
pub use catalog::{Negotiated, ValidationOutcome, VersionCatalog};
pub use envelope::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, RpcEnvelope,
};
pub use error::{McpError, McpResult, ProtocolError, TransportError};
pub use transport::{InboundEvent, Invocation, PeerTransport, StdioTransport};

/// Current version of the `mcp-core` library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The host's preferred MCP protocol version — the newest entry in
/// [`VersionCatalog::default_catalog`].
pub const PROTOCOL_VERSION: &str = "2025-03-26";
