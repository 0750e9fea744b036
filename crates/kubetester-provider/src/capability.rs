use crate::ProviderError;
use kubetester_config::ResourceKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoint references returned by control-plane creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterInfo {
    pub endpoint: Option<String>,
    pub arn: Option<String>,
    pub certificate_authority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Human-readable exit status, e.g. `exit status: 1`.
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Prerequisite infrastructure: bucket, key, key pair, role, network, control plane.
pub trait Infrastructure: Send + Sync {
    /// Create any prerequisite except the control plane.
    fn create_resource(&self, kind: ResourceKind) -> Result<(), ProviderError>;

    fn create_cluster(&self) -> Result<ClusterInfo, ProviderError>;

    fn delete_resource(&self, kind: ResourceKind) -> Result<(), ProviderError>;
}

/// An optional capability installed onto the environment (node groups included).
///
/// Every handle can be created and deleted. Log fetching and result
/// aggregation are optional and discovered through the accessor methods.
pub trait AddOn: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<(), ProviderError>;

    fn delete(&self) -> Result<(), ProviderError>;

    fn log_fetcher(&self) -> Option<&dyn LogFetcher> {
        None
    }

    fn result_aggregator(&self) -> Option<&dyn ResultAggregator> {
        None
    }
}

pub trait LogFetcher: Send + Sync {
    fn fetch_logs(&self) -> Result<(), ProviderError>;
}

pub trait ResultAggregator: Send + Sync {
    fn aggregate_results(&self) -> Result<(), ProviderError>;
}

pub trait HealthCheck: Send + Sync {
    fn check_health(&self) -> Result<(), ProviderError>;
}

pub trait ArtifactSink: Send + Sync {
    fn upload_artifacts(&self) -> Result<(), ProviderError>;
}

pub trait GpuBootstrap: Send + Sync {
    fn install_driver(&self) -> Result<(), ProviderError>;

    fn smoke_test(&self) -> Result<(), ProviderError>;
}

/// Runs operator-supplied commands (hooks).
pub trait CommandRunner: Send + Sync {
    /// `Ok` means the command ran; check [`CommandOutput::success`] for its verdict.
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ProviderError>;
}
