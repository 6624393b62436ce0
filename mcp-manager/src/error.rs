//! Error taxonomy for the Registry and Manager. Composes the lower
//! layers' errors (`SessionError`, `InstallError`) the same way `McpError`
//! nests `TransportError`/`ProtocolError`/`ValidationError` underneath it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("server id {0:?} already exists")]
    AlreadyExists(String),

    #[error("server id {0:?} is not present in the registry")]
    NotFound(String),

    #[error("invalid server id {0:?}: must match [A-Za-z0-9_-]+ and be non-empty")]
    InvalidId(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("corrupt persisted state: {0}")]
    Corrupt(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] mcp_session::error::SessionError),

    #[error(transparent)]
    Install(#[from] mcp_installer::InstallError),

    #[error("install refused: server id {0:?} already exists (uninstall it first)")]
    InstallWouldOverwrite(String),

    #[error("server id {0:?} is not present")]
    ServerNotFound(String),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
