//! The installer pipeline: turn an install string (GitHub URL, npm
//! package, pip package, tarball, or local path) into a runnable,
//! security-screened [`mcp_common::ServerRecord`].

pub mod acquire;
pub mod analyze;
pub mod build;
pub mod cache;
pub mod command;
pub mod config;
pub mod derive;
pub mod error;
pub mod origin;
pub mod pipeline;
pub mod security;

pub use cache::{cache_key, CacheEntry, MetadataCache};
pub use command::{CommandOutput, CommandRunner, FakeCommandRunner, SystemCommandRunner};
pub use config::InstallerConfig;
pub use error::{InstallError, InstallResult};
pub use origin::{parse as parse_origin, Origin};
pub use pipeline::{InstallOptions, InstallOutcome, Installer};
pub use security::{BuildSecurityOutcome, RiskLevel, SecurityFinding, SourceSecurityOutcome};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
