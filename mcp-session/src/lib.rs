//! # MCP Session
//!
//! `mcp-session` layers protocol semantics on top of `mcp-core`'s peer
//! transport: the handshake and version-negotiation sequence, a capability
//! cache for the peer's advertised tools/resources/prompts, and the
//! reconnect policy that turns a child process's crash into a supervised
//! retry instead of a dead session.

pub mod config;
pub mod descriptors;
pub mod error;
pub mod session;

pub use config::SessionConfig;
pub use descriptors::{CapabilityCache, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
pub use error::{SessionError, SessionResult};
pub use session::PeerSession;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
