use crate::health::HealthGate;
use crate::hook::{self, HookPoint};
use crate::journal::Saga;
use crate::orchestrator::Orchestrator;
use crate::registry::{SettleReason, Tier};
use crate::stop::WaitOutcome;
use crate::CoreError;
use kubetester_config::{ConfigError, NodeGroupKind, ResourceKind};
use kubetester_provider::{expand_refs, AddOn, ClusterInfo, CommandOutput, ProviderError};
use kubetester_store::{ClusterRefs, StateDocument};
use std::time::Instant;
use tracing::{debug, info, warn};

impl Orchestrator {
    /// Provision the environment.
    ///
    /// A no-op if the state already says up. On failure, and if
    /// `on_failure.delete` is set, the partial environment is torn down once
    /// before the original error is returned.
    pub fn up(&self) -> Result<(), CoreError> {
        self.ensure_writable(Saga::Up)?;
        if self.lock_state().up {
            info!("'{}' is already up", self.config.name);
            return Ok(());
        }
        info!(
            provider = self.provider.name(),
            "bringing up '{}' in {}", self.config.name, self.config.region
        );
        let started = Instant::now();

        let result = self.provision();
        let artifacts = self.provider.artifacts();
        self.best_effort(Saga::Up, "upload artifacts", || artifacts.upload_artifacts());

        match result {
            Ok(()) => {
                self.update_state(StateDocument::mark_up)?;
                info!(
                    "'{}' is up ({:.1}s)",
                    self.config.name,
                    started.elapsed().as_secs_f64()
                );
                Ok(())
            }
            Err(err) => {
                warn!("up failed: {err}");
                if self.config.on_failure.delete {
                    self.compensate(&err);
                } else {
                    warn!("on_failure.delete is off; partial environment left in place");
                }
                Err(err)
            }
        }
    }

    fn compensate(&self, cause: &CoreError) {
        warn!(
            wait_secs = self.config.on_failure.delete_wait_secs,
            "reverting partial environment"
        );
        if let WaitOutcome::Stopped(origin) = self.settle(Saga::Up, SettleReason::CompensationCooldown)
        {
            warn!("cool-down skipped after {origin}");
        }
        match self.down() {
            Ok(()) => info!("reverted partial environment after: {cause}"),
            Err(e) => warn!("failed to revert partial environment after '{cause}': {e}"),
        }
    }

    fn provision(&self) -> Result<(), CoreError> {
        for kind in ResourceKind::CREATION_ORDER {
            self.create_prerequisite(kind)?;
        }

        if let WaitOutcome::Stopped(origin) = self.settle(Saga::Up, SettleReason::PostCreate) {
            return Err(CoreError::Interrupted {
                origin,
                step: SettleReason::PostCreate.to_string(),
            });
        }
        self.health_gate("check cluster health")?;
        self.run_hook(HookPoint::AfterCreateCluster)?;

        for kind in NodeGroupKind::CREATION_ORDER {
            self.create_node_group(kind)?;
        }
        self.bootstrap_gpu()?;

        self.install_tier(Tier::Cluster)?;
        self.health_gate("check health after cluster add-ons")?;
        let artifacts = self.provider.artifacts();
        self.best_effort(Saga::Up, "upload artifacts", || artifacts.upload_artifacts());

        self.install_tier(Tier::Workload)?;
        self.health_gate("check health after workloads")?;
        self.run_hook(HookPoint::AfterCreateAddOns)?;

        self.collect_results();
        Ok(())
    }

    fn create_prerequisite(&self, kind: ResourceKind) -> Result<(), CoreError> {
        if !self.config.prerequisites.owns(kind) {
            debug!("{kind} is supplied externally, skipping");
            return Ok(());
        }
        if self.lock_state().resource_created(kind) {
            info!("{kind} already created, skipping");
            return Ok(());
        }
        let infra = self.provider.infrastructure();
        let step = format!("create {kind}");
        if kind == ResourceKind::Cluster {
            self.forward(&step, || infra.create_cluster(), |info: ClusterInfo| {
                self.update_state(|st| {
                    st.set_resource_created(kind, true);
                    st.cluster = ClusterRefs {
                        endpoint: info.endpoint,
                        arn: info.arn,
                        certificate_authority: info.certificate_authority,
                    };
                })
            })
        } else {
            self.forward(&step, || infra.create_resource(kind), |()| {
                self.update_state(|st| st.set_resource_created(kind, true))
            })
        }
    }

    fn health_gate(&self, step: &str) -> Result<(), CoreError> {
        let gate = HealthGate::new(self.provider.health(), &self.stop, &self.config.timings);
        self.forward(step, || gate.wait_healthy(), |()| Ok(()))
    }

    fn run_hook(&self, point: HookPoint) -> Result<(), CoreError> {
        let hooks = &self.config.hooks;
        let Some(template) = point.command(hooks) else {
            return Ok(());
        };
        let path = point
            .output(hooks)
            .ok_or(ConfigError::MissingHookOutput(point.as_str()))?;
        let command = expand_refs(template, &hook::refs(&self.config, &self.lock_state()));
        let runner = self.provider.commands();
        let timeout = hooks.timeout();

        self.forward(
            &format!("hook {}", point.as_str()),
            || Ok::<_, ProviderError>(runner.run(&command, timeout)),
            |result: Result<CommandOutput, ProviderError>| {
                match &result {
                    Ok(out) if out.success => info!("hook {} succeeded", point.as_str()),
                    Ok(out) => warn!("hook {} failed with {}", point.as_str(), out.status),
                    Err(e) => warn!("hook {} failed: {e}", point.as_str()),
                }
                hook::write_result(path, &hook::render(&command, &result))
            },
        )
    }

    fn create_node_group(&self, kind: NodeGroupKind) -> Result<(), CoreError> {
        let entry = self.registry.node_group(kind);
        if !entry.enabled {
            return Ok(());
        }
        if self.lock_state().node_group_created(kind) {
            info!("{kind} already created, skipping");
            return Ok(());
        }
        let handle = entry.handle()?;
        self.forward(&format!("create {kind}"), || handle.create(), |()| {
            self.update_state(|st| st.set_node_group_created(kind, true))
        })
    }

    fn bootstrap_gpu(&self) -> Result<(), CoreError> {
        if !self.config.requires_gpu_drivers() {
            return Ok(());
        }
        let gpu = self
            .provider
            .gpu()
            .ok_or_else(|| CoreError::MissingHandle("gpu".to_owned()))?;
        self.forward("install gpu driver", || gpu.install_driver(), |()| Ok(()))?;
        self.forward("gpu smoke test", || gpu.smoke_test(), |()| Ok(()))
    }

    fn install_tier(&self, tier: Tier) -> Result<(), CoreError> {
        for entry in self.registry.enabled_in(tier) {
            let kind = entry.kind();
            if self.lock_state().add_on_created(kind) {
                info!("{kind} already created, skipping");
                continue;
            }
            let handle = entry.handle()?;
            self.forward(&format!("create {kind}"), || handle.create(), |()| {
                self.update_state(|st| st.set_add_on_created(kind, true))
            })?;
        }
        Ok(())
    }

    /// Components whose logs were requested and that exist.
    fn log_targets(&self) -> Vec<&dyn AddOn> {
        let state = self.lock_state();
        let mut targets = Vec::new();
        for kind in NodeGroupKind::CREATION_ORDER {
            let entry = self.registry.node_group(kind);
            let requested = self.config.node_group(kind).fetch_logs;
            if entry.enabled && requested && state.node_group_created(kind) {
                targets.extend(entry.handle().ok());
            }
        }
        for entry in self.registry.add_ons() {
            let kind = entry.kind();
            let requested = self.config.add_on(kind).is_some_and(|a| a.fetch_logs);
            if entry.enabled && requested && state.add_on_created(kind) {
                targets.extend(entry.handle().ok());
            }
        }
        targets
    }

    /// Fetch requested logs, then aggregate results if anything was fetched.
    /// Nothing here fails the saga.
    fn collect_results(&self) {
        let targets = self.log_targets();
        if targets.is_empty() {
            return;
        }
        self.settle(Saga::Up, SettleReason::LogFetch);

        let mut fetched = false;
        for target in targets {
            let Some(fetcher) = target.log_fetcher() else {
                debug!("{} cannot fetch logs", target.name());
                continue;
            };
            let step = format!("fetch_logs {}", target.name());
            fetched |= self.best_effort(Saga::Up, &step, || fetcher.fetch_logs());
        }
        if !fetched {
            return;
        }

        for entry in self.registry.add_ons() {
            if !self.lock_state().add_on_created(entry.kind()) {
                continue;
            }
            let Ok(handle) = entry.handle() else {
                continue;
            };
            if let Some(aggregator) = handle.result_aggregator() {
                let step = format!("aggregate {}", handle.name());
                self.best_effort(Saga::Up, &step, || aggregator.aggregate_results());
            }
        }
    }
}
