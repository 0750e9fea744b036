use crate::capability::{
    AddOn, ArtifactSink, ClusterInfo, CommandOutput, CommandRunner, GpuBootstrap, HealthCheck,
    Infrastructure, LogFetcher, ResultAggregator,
};
use crate::provider::Provider;
use crate::shell::{expand_refs, ShellRunner};
use crate::ProviderError;
use kubetester_config::{
    AddOnKind, ComponentCommands, EnvironmentConfig, NodeGroupKind, ResourceKind, StepCommands,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared invocation context: runner, timeout, and `{{ref}}` values.
#[derive(Clone)]
struct Invoker {
    runner: ShellRunner,
    timeout: Duration,
    refs: Arc<Vec<(String, String)>>,
}

impl Invoker {
    fn invoke(&self, step: &str, template: Option<&str>) -> Result<CommandOutput, ProviderError> {
        let Some(template) = template else {
            warn!("no command configured for '{step}', skipping");
            return Ok(CommandOutput {
                success: true,
                status: "skipped".to_owned(),
                stdout: String::new(),
                stderr: String::new(),
            });
        };
        let command = expand_refs(template, &self.refs);
        info!("{step}: {command}");
        let out = self.runner.run(&command, self.timeout)?;
        if out.success {
            Ok(out)
        } else {
            Err(ProviderError::CommandFailed {
                command,
                status: out.status,
                stderr: out.stderr.trim().to_owned(),
            })
        }
    }
}

/// Parse `key=value` lines printed by the create-cluster command.
fn parse_cluster_info(stdout: &str) -> ClusterInfo {
    let mut info = ClusterInfo::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = Some(value.trim().to_owned());
        match key.trim() {
            "endpoint" => info.endpoint = value,
            "arn" => info.arn = value,
            "certificate_authority" => info.certificate_authority = value,
            _ => {}
        }
    }
    info
}

/// Node group or add-on backed by configured shell commands.
struct CommandComponent {
    target: String,
    commands: ComponentCommands,
    invoker: Invoker,
}

impl AddOn for CommandComponent {
    fn name(&self) -> &str {
        &self.target
    }

    fn create(&self) -> Result<(), ProviderError> {
        let step = format!("create {}", self.target);
        self.invoker
            .invoke(&step, self.commands.create.as_deref())
            .map(drop)
    }

    fn delete(&self) -> Result<(), ProviderError> {
        let step = format!("delete {}", self.target);
        self.invoker
            .invoke(&step, self.commands.delete.as_deref())
            .map(drop)
    }

    fn log_fetcher(&self) -> Option<&dyn LogFetcher> {
        self.commands.logs.is_some().then_some(self as &dyn LogFetcher)
    }

    fn result_aggregator(&self) -> Option<&dyn ResultAggregator> {
        self.commands
            .aggregate
            .is_some()
            .then_some(self as &dyn ResultAggregator)
    }
}

impl LogFetcher for CommandComponent {
    fn fetch_logs(&self) -> Result<(), ProviderError> {
        let step = format!("fetch_logs {}", self.target);
        self.invoker
            .invoke(&step, self.commands.logs.as_deref())
            .map(drop)
    }
}

impl ResultAggregator for CommandComponent {
    fn aggregate_results(&self) -> Result<(), ProviderError> {
        let step = format!("aggregate {}", self.target);
        self.invoker
            .invoke(&step, self.commands.aggregate.as_deref())
            .map(drop)
    }
}

/// Provider whose every step is an operator-configured shell command.
///
/// Unconfigured steps are skipped with a warning.
pub struct CommandProvider {
    invoker: Invoker,
    steps: StepCommands,
    node_groups: BTreeMap<NodeGroupKind, Arc<CommandComponent>>,
    add_ons: BTreeMap<AddOnKind, Arc<CommandComponent>>,
}

impl CommandProvider {
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        let mut refs = vec![
            ("name".to_owned(), config.name.clone()),
            ("region".to_owned(), config.region.clone()),
        ];
        if let Some(ref kubeconfig) = config.kubeconfig {
            refs.push(("kubeconfig".to_owned(), kubeconfig.display().to_string()));
        }
        let invoker = Invoker {
            runner: ShellRunner,
            timeout: config.provider.command_timeout(),
            refs: Arc::new(refs),
        };

        let component = |target: String, commands: ComponentCommands| {
            Arc::new(CommandComponent {
                target,
                commands,
                invoker: invoker.clone(),
            })
        };

        let node_groups = NodeGroupKind::CREATION_ORDER
            .into_iter()
            .map(|kind| {
                let commands = config.node_group(kind).commands();
                (kind, component(kind.to_string(), commands))
            })
            .collect();

        let add_ons = AddOnKind::ALL
            .iter()
            .map(|kind| {
                let commands = config
                    .add_on(*kind)
                    .map(kubetester_config::AddOnConfig::commands)
                    .unwrap_or_default();
                (*kind, component(kind.to_string(), commands))
            })
            .collect();

        Self {
            invoker,
            steps: config.prerequisites.commands.clone(),
            node_groups,
            add_ons,
        }
    }
}

impl Infrastructure for CommandProvider {
    fn create_resource(&self, kind: ResourceKind) -> Result<(), ProviderError> {
        self.invoker
            .invoke(&format!("create {kind}"), self.steps.create(kind))
            .map(drop)
    }

    fn create_cluster(&self) -> Result<ClusterInfo, ProviderError> {
        let out = self
            .invoker
            .invoke("create cluster", self.steps.create(ResourceKind::Cluster))?;
        Ok(parse_cluster_info(&out.stdout))
    }

    fn delete_resource(&self, kind: ResourceKind) -> Result<(), ProviderError> {
        self.invoker
            .invoke(&format!("delete {kind}"), self.steps.delete(kind))
            .map(drop)
    }
}

impl HealthCheck for CommandProvider {
    fn check_health(&self) -> Result<(), ProviderError> {
        match self
            .invoker
            .invoke("check_health", self.steps.check_health.as_deref())
        {
            Ok(_) => Ok(()),
            Err(ProviderError::CommandFailed { stderr, .. }) => Err(ProviderError::Unhealthy(stderr)),
            Err(e) => Err(e),
        }
    }
}

impl ArtifactSink for CommandProvider {
    fn upload_artifacts(&self) -> Result<(), ProviderError> {
        self.invoker
            .invoke("upload_artifacts", self.steps.upload_artifacts.as_deref())
            .map(drop)
    }
}

impl GpuBootstrap for CommandProvider {
    fn install_driver(&self) -> Result<(), ProviderError> {
        self.invoker
            .invoke("install_gpu_driver", self.steps.install_gpu_driver.as_deref())
            .map(drop)
    }

    fn smoke_test(&self) -> Result<(), ProviderError> {
        self.invoker
            .invoke("gpu_smoke_test", self.steps.gpu_smoke_test.as_deref())
            .map(drop)
    }
}

impl Provider for CommandProvider {
    fn name(&self) -> &'static str {
        "command"
    }

    fn infrastructure(&self) -> &dyn Infrastructure {
        self
    }

    fn health(&self) -> &dyn HealthCheck {
        self
    }

    fn artifacts(&self) -> &dyn ArtifactSink {
        self
    }

    fn commands(&self) -> &dyn CommandRunner {
        &self.invoker.runner
    }

    fn gpu(&self) -> Option<&dyn GpuBootstrap> {
        Some(self)
    }

    fn node_group(&self, kind: NodeGroupKind) -> Option<Arc<dyn AddOn>> {
        self.node_groups
            .get(&kind)
            .map(|c| Arc::clone(c) as Arc<dyn AddOn>)
    }

    fn add_on(&self, kind: AddOnKind) -> Option<Arc<dyn AddOn>> {
        self.add_ons
            .get(&kind)
            .map(|c| Arc::clone(c) as Arc<dyn AddOn>)
    }
}
