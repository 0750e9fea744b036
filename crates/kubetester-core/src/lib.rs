//! Saga orchestration for kubetester test environments.
//!
//! The [`Orchestrator`] drives the provisioning (`up`) and teardown (`down`)
//! sagas over a [`kubetester_provider::Provider`], recording every created
//! resource in a [`kubetester_store::StateStore`] so that teardown is exact and
//! idempotent. A process-wide [`StopSignal`] lets SIGINT/SIGTERM end a saga at
//! the next step boundary without ever abandoning a step half-way.

pub mod concurrency;
pub mod executor;
pub mod health;
pub mod hook;
pub mod journal;
pub mod orchestrator;
mod provision;
pub mod registry;
pub mod stop;
mod teardown;

pub use concurrency::StateLock;
pub use executor::{run_interruptible, StepOutcome};
pub use health::HealthGate;
pub use hook::HookPoint;
pub use journal::{JournalRecord, RecordKind, RecordStatus, Saga, SagaJournal};
pub use orchestrator::Orchestrator;
pub use registry::{AddOnDescriptor, Cleanup, Registry, SettleReason, Tier, DESCRIPTORS};
pub use stop::{install_signal_handler, StopOrigin, StopSignal, WaitOutcome};

use kubetester_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] kubetester_config::ConfigError),
    #[error("state store error: {0}")]
    Store(#[from] kubetester_store::StoreError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("{step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: ProviderError,
    },
    #[error("interrupted by {origin} during '{step}'")]
    Interrupted { origin: StopOrigin, step: String },
    #[error("no handle for enabled component '{0}'")]
    MissingHandle(String),
    #[error("failed to write hook output {path}: {source}")]
    HookOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("teardown finished with errors: {}", .0.join(", "))]
    Teardown(Vec<String>),
    #[error("state document belongs to '{found}', config names '{expected}'")]
    StateMismatch { expected: String, found: String },
    #[error("cannot run {0} saga: environment was opened read-only")]
    ReadOnly(String),
    #[error("state is locked: {0}")]
    Locked(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CoreError::Interrupted { .. })
    }
}
