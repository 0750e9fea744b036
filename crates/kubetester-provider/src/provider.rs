use crate::capability::{
    AddOn, ArtifactSink, CommandRunner, GpuBootstrap, HealthCheck, Infrastructure,
};
use crate::ProviderError;
use kubetester_config::{AddOnKind, EnvironmentConfig, NodeGroupKind};
use std::sync::Arc;

/// Bundle of collaborators for one environment.
///
/// Handle accessors return `None` when the provider cannot materialize the
/// capability; the orchestrator treats that as fatal when the capability is
/// enabled.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn infrastructure(&self) -> &dyn Infrastructure;

    fn health(&self) -> &dyn HealthCheck;

    fn artifacts(&self) -> &dyn ArtifactSink;

    fn commands(&self) -> &dyn CommandRunner;

    fn gpu(&self) -> Option<&dyn GpuBootstrap>;

    fn node_group(&self, kind: NodeGroupKind) -> Option<Arc<dyn AddOn>>;

    fn add_on(&self, kind: AddOnKind) -> Option<Arc<dyn AddOn>>;
}

pub fn select_provider(
    name: &str,
    config: &EnvironmentConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match name {
        "command" => Ok(Arc::new(crate::command::CommandProvider::from_config(
            config,
        ))),
        "mock" => Ok(Arc::new(crate::mock::MockProvider::new())),
        other => Err(ProviderError::Unavailable(other.to_owned())),
    }
}
