use crate::capability::{
    AddOn, ArtifactSink, ClusterInfo, CommandOutput, CommandRunner, GpuBootstrap, HealthCheck,
    Infrastructure, LogFetcher, ResultAggregator,
};
use crate::provider::Provider;
use crate::ProviderError;
use kubetester_config::{AddOnKind, NodeGroupKind, ResourceKind};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Trigger = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, String>>,
    missing: Mutex<HashSet<String>>,
    triggers: Mutex<HashMap<String, Trigger>>,
}

impl MockState {
    /// Record a call, fire its trigger, then apply any injected failure.
    fn call(&self, key: String) -> Result<(), ProviderError> {
        lock(&self.calls).push(key.clone());
        let trigger = lock(&self.triggers).get(&key).cloned();
        if let Some(trigger) = trigger {
            trigger();
        }
        match lock(&self.failures).get(&key) {
            Some(message) => Err(ProviderError::Failed {
                step: key,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn has_handle(&self, target: &str) -> bool {
        !lock(&self.missing).contains(target)
    }
}

/// Node groups fetch logs; the remote load testers aggregate results.
fn aggregates_results(kind: AddOnKind) -> bool {
    matches!(
        kind,
        AddOnKind::CsrsRemote
            | AddOnKind::SecretsRemote
            | AddOnKind::Irsa
            | AddOnKind::ConfigMapsRemote
            | AddOnKind::ClusterLoaderRemote
            | AddOnKind::StresserRemote
    )
}

struct MockComponent {
    target: String,
    state: Arc<MockState>,
    fetches_logs: bool,
    aggregates: bool,
}

impl AddOn for MockComponent {
    fn name(&self) -> &str {
        &self.target
    }

    fn create(&self) -> Result<(), ProviderError> {
        self.state.call(format!("create {}", self.target))
    }

    fn delete(&self) -> Result<(), ProviderError> {
        self.state.call(format!("delete {}", self.target))
    }

    fn log_fetcher(&self) -> Option<&dyn LogFetcher> {
        self.fetches_logs.then_some(self as &dyn LogFetcher)
    }

    fn result_aggregator(&self) -> Option<&dyn ResultAggregator> {
        self.aggregates.then_some(self as &dyn ResultAggregator)
    }
}

impl LogFetcher for MockComponent {
    fn fetch_logs(&self) -> Result<(), ProviderError> {
        self.state.call(format!("fetch_logs {}", self.target))
    }
}

impl ResultAggregator for MockComponent {
    fn aggregate_results(&self) -> Result<(), ProviderError> {
        self.state.call(format!("aggregate {}", self.target))
    }
}

/// In-memory provider that records every call.
///
/// Calls are recorded as `"<verb> <target>"`, e.g. `"create cluster"`,
/// `"delete add_on:jobs_echo"`, `"fetch_logs node_group:managed"`,
/// `"check_health"`, `"run <command>"`. Clones share the same log.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given call fail with `message` every time it is made.
    pub fn fail_on(&self, call: &str, message: &str) -> &Self {
        lock(&self.state.failures).insert(call.to_owned(), message.to_owned());
        self
    }

    /// Stop materializing a handle, e.g. `"add_on:jobs_echo"` or `"gpu"`.
    pub fn without_handle(&self, target: &str) -> &Self {
        lock(&self.state.missing).insert(target.to_owned());
        self
    }

    /// Run `f` inside the given call, before its result is decided.
    pub fn on_call(&self, call: &str, f: impl Fn() + Send + Sync + 'static) -> &Self {
        lock(&self.state.triggers).insert(call.to_owned(), Arc::new(f));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state.calls).clear();
    }

    pub fn count(&self, call: &str) -> usize {
        lock(&self.state.calls).iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        lock(&self.state.calls).iter().position(|c| c == call)
    }

    /// Every `delete ...` call recorded so far.
    pub fn destructive_calls(&self) -> Vec<String> {
        lock(&self.state.calls)
            .iter()
            .filter(|c| c.starts_with("delete "))
            .cloned()
            .collect()
    }
}

impl Infrastructure for MockProvider {
    fn create_resource(&self, kind: ResourceKind) -> Result<(), ProviderError> {
        self.state.call(format!("create {kind}"))
    }

    fn create_cluster(&self) -> Result<ClusterInfo, ProviderError> {
        self.state.call("create cluster".to_owned())?;
        Ok(ClusterInfo {
            endpoint: Some("https://mock.cluster.local".to_owned()),
            arn: Some("arn:mock:eks:cluster/mock".to_owned()),
            certificate_authority: Some("bW9jay1jYQ==".to_owned()),
        })
    }

    fn delete_resource(&self, kind: ResourceKind) -> Result<(), ProviderError> {
        self.state.call(format!("delete {kind}"))
    }
}

impl HealthCheck for MockProvider {
    fn check_health(&self) -> Result<(), ProviderError> {
        self.state
            .call("check_health".to_owned())
            .map_err(|e| ProviderError::Unhealthy(e.to_string()))
    }
}

impl ArtifactSink for MockProvider {
    fn upload_artifacts(&self) -> Result<(), ProviderError> {
        self.state.call("upload_artifacts".to_owned())
    }
}

impl GpuBootstrap for MockProvider {
    fn install_driver(&self) -> Result<(), ProviderError> {
        self.state.call("install_gpu_driver".to_owned())
    }

    fn smoke_test(&self) -> Result<(), ProviderError> {
        self.state.call("gpu_smoke_test".to_owned())
    }
}

impl CommandRunner for MockProvider {
    fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, ProviderError> {
        let result = self.state.call(format!("run {command}"));
        Ok(CommandOutput {
            success: result.is_ok(),
            status: if result.is_ok() {
                "exit status: 0".to_owned()
            } else {
                "exit status: 1".to_owned()
            },
            stdout: format!("mock-run: {command}\n"),
            stderr: result.err().map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
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
        self
    }

    fn gpu(&self) -> Option<&dyn GpuBootstrap> {
        self.state
            .has_handle("gpu")
            .then_some(self as &dyn GpuBootstrap)
    }

    fn node_group(&self, kind: NodeGroupKind) -> Option<Arc<dyn AddOn>> {
        let target = kind.to_string();
        if !self.state.has_handle(&target) {
            return None;
        }
        Some(Arc::new(MockComponent {
            target,
            state: Arc::clone(&self.state),
            fetches_logs: true,
            aggregates: false,
        }))
    }

    fn add_on(&self, kind: AddOnKind) -> Option<Arc<dyn AddOn>> {
        let target = kind.to_string();
        if !self.state.has_handle(&target) {
            return None;
        }
        Some(Arc::new(MockComponent {
            target,
            state: Arc::clone(&self.state),
            fetches_logs: false,
            aggregates: aggregates_results(kind),
        }))
    }
}
