//! Durable and volatile data model shared across the host runtime.
//!
//! `mcp-common` owns the types every other crate in the workspace exchanges
//! at its boundary: the persisted [`ServerRecord`], the volatile
//! [`ServerStatus`], the [`Invocation`] quadruple used to spawn a peer, and
//! the [`ManagerEvent`] fan-out enum the host subscribes to. Nothing here
//! depends on `tokio::process`, a transport, or a session: this crate is
//! pure data plus the small amount of validation that belongs to the
//! Registry (id shape, uniqueness preconditions the registry checks before
//! ever touching storage).

pub mod events;
pub mod model;

pub use events::ManagerEvent;
pub use model::{
    InstallMethod, Invocation, PeerState, ServerMetadata, ServerRecord, ServerStatus,
    DEFAULT_MAX_RECONNECT_ATTEMPTS,
};

/// Current version of the `mcp-common` data model.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
