use crate::executor::{run_interruptible, StepOutcome};
use crate::journal::{RecordKind, RecordStatus, Saga};
use crate::orchestrator::Orchestrator;
use crate::registry::{AddOnEntry, SettleReason};
use crate::CoreError;
use kubetester_config::{NodeGroupKind, ResourceKind};
use kubetester_provider::ProviderError;
use kubetester_store::StateDocument;
use std::sync::PoisonError;
use std::time::Instant;
use tracing::{info, warn};

/// Error collection for one Down run. Individual failures never stop the
/// run; they are reported together at the end.
struct Teardown<'a> {
    orch: &'a Orchestrator,
    errors: Vec<String>,
    interruption_noted: bool,
}

impl<'a> Teardown<'a> {
    fn new(orch: &'a Orchestrator) -> Self {
        Self {
            orch,
            errors: Vec::new(),
            interruption_noted: false,
        }
    }

    fn step<F>(&mut self, step: &str, work: F) -> bool
    where
        F: FnOnce() -> Result<(), ProviderError> + Send,
    {
        info!(step, "starting");
        let record = self.orch.journal_start(Saga::Down, RecordKind::Step, step);
        let result = match run_interruptible(&self.orch.stop, work) {
            StepOutcome::Finished(result) => result,
            StepOutcome::Interrupted { origin, output } => {
                if !self.interruption_noted {
                    warn!("{origin} received during teardown; continuing so nothing is left behind");
                    self.interruption_noted = true;
                }
                output
            }
        };
        match result {
            Ok(()) => {
                self.orch.journal_finish(record, RecordStatus::Succeeded, None);
                true
            }
            Err(e) => {
                warn!("{step} failed: {e}");
                self.orch
                    .journal_finish(record, RecordStatus::Failed, Some(e.to_string()));
                self.errors.push(format!("{step}: {e}"));
                false
            }
        }
    }

    fn persist(&mut self, f: impl FnOnce(&mut StateDocument)) {
        if let Err(e) = self.orch.update_state(f) {
            warn!("failed to persist state: {e}");
            self.errors.push(format!("persist state: {e}"));
        }
    }

    fn resource(&mut self, kind: ResourceKind) {
        let orch = self.orch;
        if !orch.lock_state().resource_created(kind) {
            return;
        }
        let infra = orch.provider.infrastructure();
        if self.step(&format!("delete {kind}"), || infra.delete_resource(kind)) {
            self.persist(|st| st.set_resource_created(kind, false));
        }
    }

    /// Returns whether a delete was attempted.
    fn add_on(&mut self, entry: &AddOnEntry) -> Result<bool, CoreError> {
        let kind = entry.kind();
        if !self.orch.lock_state().add_on_created(kind) {
            return Ok(false);
        }
        let handle = entry.handle()?;
        if self.step(&format!("delete {kind}"), || handle.delete()) {
            self.persist(|st| st.set_add_on_created(kind, false));
        }
        self.orch.settle(
            Saga::Down,
            SettleReason::AddOnCleanup {
                kind,
                class: entry.descriptor.cleanup,
            },
        );
        Ok(true)
    }

    /// Returns whether a delete was attempted.
    fn node_group(&mut self, kind: NodeGroupKind) -> Result<bool, CoreError> {
        let orch = self.orch;
        if !orch.lock_state().node_group_created(kind) {
            return Ok(false);
        }
        let handle = orch.registry.node_group(kind).handle()?;
        if self.step(&format!("delete {kind}"), || handle.delete()) {
            self.persist(|st| st.set_node_group_created(kind, false));
        }
        Ok(true)
    }
}

impl Orchestrator {
    /// Tear the environment down in reverse dependency order.
    ///
    /// Only components flagged as created are deleted, so running this again
    /// after a clean teardown makes no destructive calls. Failures are
    /// collected and returned together once every step has been attempted.
    /// The stop signal is noted but never ends the run early.
    pub fn down(&self) -> Result<(), CoreError> {
        self.ensure_writable(Saga::Down)?;
        let _serial = self
            .down_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        info!("tearing down '{}'", self.config.name);
        let started = Instant::now();
        let mut run = Teardown::new(self);

        let artifacts = self.provider.artifacts();
        self.best_effort(Saga::Down, "upload artifacts", || artifacts.upload_artifacts());

        run.resource(ResourceKind::KeyPair);

        let add_ons = self.registry.add_ons();
        for entry in add_ons.iter().rev() {
            if !entry.descriptor.provisions_load_balancer() {
                run.add_on(entry)?;
            }
        }
        let mut load_balancers = false;
        for entry in add_ons.iter().rev() {
            if entry.descriptor.provisions_load_balancer() {
                load_balancers |= run.add_on(entry)?;
            }
        }
        if load_balancers && self.config.any_node_group_enabled() {
            self.settle(Saga::Down, SettleReason::LoadBalancerNetwork);
        }

        for kind in [NodeGroupKind::Managed, NodeGroupKind::Unmanaged] {
            if run.node_group(kind)? {
                self.settle(Saga::Down, SettleReason::NodeGroupDrain(kind));
            }
        }

        run.resource(ResourceKind::Cluster);
        run.resource(ResourceKind::EncryptionKey);
        run.resource(ResourceKind::ClusterRole);
        if self.lock_state().resource_created(ResourceKind::Network) {
            self.settle(Saga::Down, SettleReason::NetworkRelease);
            run.resource(ResourceKind::Network);
        }
        run.resource(ResourceKind::Bucket);

        run.persist(StateDocument::mark_down);

        let elapsed = started.elapsed().as_secs_f64();
        if run.errors.is_empty() {
            info!("'{}' torn down ({elapsed:.1}s)", self.config.name);
            Ok(())
        } else {
            warn!(
                "'{}' teardown finished with {} error(s) ({elapsed:.1}s)",
                self.config.name,
                run.errors.len()
            );
            Err(CoreError::Teardown(run.errors))
        }
    }
}
