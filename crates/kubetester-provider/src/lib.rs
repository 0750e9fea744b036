//! Provisioning collaborators for kubetester.
//!
//! This crate defines the narrow capability traits the orchestrator drives
//! (`Infrastructure`, `AddOn`, `LogFetcher`, `ResultAggregator`, `HealthCheck`,
//! `ArtifactSink`, `GpuBootstrap`, `CommandRunner`), the `Provider` bundle that
//! materializes them, and two implementations: a `command` provider that shells
//! out to operator-configured commands and a recording `mock` provider.

pub mod capability;
pub mod command;
pub mod mock;
pub mod prereq;
pub mod provider;
pub mod shell;

pub use capability::{
    AddOn, ArtifactSink, ClusterInfo, CommandOutput, CommandRunner, GpuBootstrap, HealthCheck,
    Infrastructure, LogFetcher, ResultAggregator,
};
pub use command::CommandProvider;
pub use mock::MockProvider;
pub use prereq::{check_command_prereqs, format_missing, MissingPrereq};
pub use provider::{select_provider, Provider};
pub use shell::{expand_refs, ShellRunner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("provider '{0}' is not available")]
    Unavailable(String),
    #[error("{step}: {message}")]
    Failed { step: String, message: String },
    #[error("command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("unhealthy: {0}")]
    Unhealthy(String),
}
