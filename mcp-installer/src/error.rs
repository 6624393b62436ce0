//! Error taxonomy for the installer pipeline.
//!
//! Every stage failure becomes an [`InstallError`] variant; the pipeline's
//! retry loop only re-enters on variants that aren't
//! `SecurityBlocked` — a blocked install is a terminal decision, not a
//! transient fault.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("could not classify install origin: {0}")]
    UnrecognizedOrigin(String),

    #[error("source security gate rejected {url}: {reasons:?}")]
    SecurityBlocked { url: String, reasons: Vec<String> },

    #[error("build security scan found high-risk issues: {findings:?}")]
    BuildSecurityBlocked { findings: Vec<String> },

    #[error("acquisition failed for {url}: {reason}")]
    AcquisitionFailed { url: String, reason: String },

    #[error("project analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("dependency install failed: {0}")]
    DependencyInstallFailed(String),

    #[error("build failed: all candidate commands exited non-zero ({commands:?})")]
    BuildFailed { commands: Vec<String> },

    #[error("build output directory not found among candidates {candidates:?}")]
    OutputDirMissing { candidates: Vec<String> },

    #[error("build output directory {0} is empty")]
    OutputDirEmpty(String),

    #[error("command {command:?} exited with status {status}: {stderr}")]
    CommandFailed {
        command: Vec<String>,
        status: i32,
        stderr: String,
    },

    #[error("command {0:?} timed out")]
    CommandTimeout(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache metadata error: {0}")]
    Cache(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("server id {0:?} is not present in the registry")]
    UnknownServer(String),
}

impl InstallError {
    /// Whether the pipeline's `autoRetry` loop should
    /// consider re-entering from step 1 for this failure. A deliberate
    /// security rejection is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            InstallError::SecurityBlocked { .. } | InstallError::BuildSecurityBlocked { .. }
        )
    }
}

pub type InstallResult<T> = Result<T, InstallError>;
