use crate::executor::{run_interruptible, StepOutcome};
use crate::journal::{JournalRecord, RecordKind, RecordStatus, Saga, SagaJournal};
use crate::registry::{Registry, SettleReason};
use crate::stop::{StopSignal, WaitOutcome};
use crate::CoreError;
use kubetester_config::{EnvironmentConfig, NodeGroupKind};
use kubetester_provider::{Provider, ProviderError};
use kubetester_store::{StateDocument, StateStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives the Up and Down sagas for one environment.
///
/// The state document is the single source of truth for what exists: every
/// successful create sets a flag and persists before the next step starts,
/// and teardown only deletes what is flagged.
pub struct Orchestrator {
    pub(crate) config: EnvironmentConfig,
    pub(crate) provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    pub(crate) stop: StopSignal,
    pub(crate) registry: Registry,
    state: Mutex<StateDocument>,
    pub(crate) down_lock: Mutex<()>,
    journal: Mutex<SagaJournal>,
    writable: bool,
}

impl Orchestrator {
    /// Open the environment for running sagas, persisting the loaded state
    /// with the config's current intent.
    pub fn new(
        config: EnvironmentConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        stop: StopSignal,
    ) -> Result<Self, CoreError> {
        Self::open(config, provider, store, stop, true)
    }

    /// Open the environment for queries only.
    ///
    /// Nothing is written to the store, so callers need not hold the state
    /// lock. [`Orchestrator::up`] and [`Orchestrator::down`] are refused.
    pub fn open_read_only(
        config: EnvironmentConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        stop: StopSignal,
    ) -> Result<Self, CoreError> {
        Self::open(config, provider, store, stop, false)
    }

    fn open(
        config: EnvironmentConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        stop: StopSignal,
        writable: bool,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let mut state = match store.load()? {
            Some(doc) if doc.name != config.name => {
                return Err(CoreError::StateMismatch {
                    expected: config.name.clone(),
                    found: doc.name,
                });
            }
            Some(doc) => doc,
            None => StateDocument::new(&config.name),
        };
        state.sync_intent(&config);
        if writable {
            state.touch();
            store.save(&state)?;
        }

        let registry = Registry::materialize(&config, &state, provider.as_ref());
        debug!(
            provider = provider.name(),
            up = state.up,
            writable,
            "loaded state for '{}' ({} add-ons tracked)",
            config.name,
            registry.add_ons().len()
        );

        Ok(Self {
            config,
            provider,
            store,
            stop,
            registry,
            state: Mutex::new(state),
            down_lock: Mutex::new(()),
            journal: Mutex::new(SagaJournal::new()),
            writable,
        })
    }

    pub fn is_read_only(&self) -> bool {
        !self.writable
    }

    pub(crate) fn ensure_writable(&self, saga: Saga) -> Result<(), CoreError> {
        if self.writable {
            Ok(())
        } else {
            Err(CoreError::ReadOnly(saga.to_string()))
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Snapshot of the current state document.
    pub fn state(&self) -> StateDocument {
        self.lock_state().clone()
    }

    /// Snapshot of every journal record so far.
    pub fn journal(&self) -> Vec<JournalRecord> {
        lock(&self.journal).records().to_vec()
    }

    pub fn journal_labels(&self, saga: Saga) -> Vec<String> {
        lock(&self.journal).labels(saga)
    }

    pub fn journal_summary(&self) -> String {
        lock(&self.journal).summary()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StateDocument> {
        lock(&self.state)
    }

    /// Apply `f` to the state document and persist it.
    pub(crate) fn update_state(&self, f: impl FnOnce(&mut StateDocument)) -> Result<(), CoreError> {
        let mut state = self.lock_state();
        f(&mut state);
        state.touch();
        self.store.save(&state)?;
        Ok(())
    }

    pub(crate) fn journal_start(&self, saga: Saga, kind: RecordKind, name: &str) -> usize {
        lock(&self.journal).start(saga, kind, name)
    }

    pub(crate) fn journal_finish(&self, index: usize, status: RecordStatus, detail: Option<String>) {
        lock(&self.journal).finish(index, status, detail);
    }

    /// Wait out a settle delay, returning early if the stop signal fires.
    pub(crate) fn settle(&self, saga: Saga, reason: SettleReason) -> WaitOutcome {
        let duration = reason.duration(&self.config);
        let record = self.journal_start(saga, RecordKind::Settle, &reason.to_string());
        if !duration.is_zero() {
            info!(wait_secs = duration.as_secs(), "waiting for {reason}");
        }
        let outcome = self.stop.wait(duration);
        let status = match outcome {
            WaitOutcome::Elapsed => RecordStatus::Elapsed,
            WaitOutcome::Stopped(origin) => {
                if !duration.is_zero() {
                    info!("{reason} wait cut short by {origin}");
                }
                RecordStatus::Cut
            }
        };
        self.journal_finish(record, status, None);
        outcome
    }

    /// Run a step whose failure is logged and otherwise ignored.
    ///
    /// Returns whether the step succeeded.
    pub(crate) fn best_effort<F>(&self, saga: Saga, step: &str, work: F) -> bool
    where
        F: FnOnce() -> Result<(), ProviderError> + Send,
    {
        let record = self.journal_start(saga, RecordKind::Step, step);
        match run_interruptible(&self.stop, work).into_output() {
            Ok(()) => {
                self.journal_finish(record, RecordStatus::Succeeded, None);
                true
            }
            Err(e) => {
                warn!("{step} failed (ignored): {e}");
                self.journal_finish(record, RecordStatus::Failed, Some(e.to_string()));
                false
            }
        }
    }

    /// True only if the state says up and the health check passes.
    ///
    /// A failing health check is an error, not `false`.
    pub fn is_up(&self) -> Result<bool, CoreError> {
        if !self.lock_state().up {
            return Ok(false);
        }
        self.provider
            .health()
            .check_health()
            .map_err(|source| CoreError::Step {
                step: "check_health".to_owned(),
                source,
            })?;
        Ok(true)
    }

    /// Fetch logs from every enabled, created node group family.
    ///
    /// Stops at the first failure.
    pub fn dump_cluster_logs(&self) -> Result<(), CoreError> {
        for kind in NodeGroupKind::CREATION_ORDER {
            let entry = self.registry.node_group(kind);
            if !entry.enabled || !self.lock_state().node_group_created(kind) {
                continue;
            }
            let handle = entry.handle()?;
            let Some(fetcher) = handle.log_fetcher() else {
                debug!("{kind} has no log fetcher, skipping");
                continue;
            };
            info!("fetching logs from {kind}");
            fetcher.fetch_logs().map_err(|source| CoreError::Step {
                step: format!("fetch_logs {kind}"),
                source,
            })?;
        }
        Ok(())
    }

    /// Run `work` as a step of the Up saga.
    ///
    /// Refuses to start once the stop signal has fired. If the signal fires
    /// while the step runs, a successful result is still committed before
    /// reporting the interruption.
    pub(crate) fn forward<T, W, C>(&self, step: &str, work: W, commit: C) -> Result<(), CoreError>
    where
        T: Send,
        W: FnOnce() -> Result<T, ProviderError> + Send,
        C: FnOnce(T) -> Result<(), CoreError>,
    {
        if let Some(origin) = self.stop.origin() {
            return Err(CoreError::Interrupted {
                origin,
                step: step.to_owned(),
            });
        }
        info!(step, "starting");
        let record = self.journal_start(Saga::Up, RecordKind::Step, step);
        match run_interruptible(&self.stop, work) {
            StepOutcome::Finished(Ok(value)) => {
                self.journal_finish(record, RecordStatus::Succeeded, None);
                commit(value)
            }
            StepOutcome::Finished(Err(source)) => {
                self.journal_finish(record, RecordStatus::Failed, Some(source.to_string()));
                Err(CoreError::Step {
                    step: step.to_owned(),
                    source,
                })
            }
            StepOutcome::Interrupted { origin, output } => {
                warn!(step, "{origin} received; step ran to completion");
                self.journal_finish(record, RecordStatus::Interrupted, None);
                match output {
                    Ok(value) => commit(value)?,
                    Err(e) => warn!("{step} also failed: {e}"),
                }
                Err(CoreError::Interrupted {
                    origin,
                    step: step.to_owned(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetester_config::Timings;
    use kubetester_provider::MockProvider;
    use kubetester_store::MemoryStateStore;

    fn config() -> EnvironmentConfig {
        let mut config = EnvironmentConfig::template("orch", "us-west-2");
        config.timings = Timings::immediate();
        config
    }

    #[test]
    fn new_persists_fresh_document() {
        let store = MemoryStateStore::new();
        let orch = Orchestrator::new(
            config(),
            Arc::new(MockProvider::new()),
            Arc::new(store.clone()),
            StopSignal::new(),
        )
        .unwrap();
        assert!(!orch.state().up);
        assert_eq!(store.document().unwrap().name, "orch");
    }

    #[test]
    fn foreign_state_document_is_rejected() {
        let store = MemoryStateStore::with_document(StateDocument::new("someone-else"));
        let result = Orchestrator::new(
            config(),
            Arc::new(MockProvider::new()),
            Arc::new(store),
            StopSignal::new(),
        );
        assert!(matches!(result, Err(CoreError::StateMismatch { .. })));
    }

    #[test]
    fn forward_refuses_after_stop() {
        let mock = MockProvider::new();
        let stop = StopSignal::new();
        let orch = Orchestrator::new(
            config(),
            Arc::new(mock.clone()),
            Arc::new(MemoryStateStore::new()),
            stop.clone(),
        )
        .unwrap();
        stop.request_stop();
        let result = orch.forward("create bucket", || Ok(()), |()| Ok(()));
        assert!(matches!(result, Err(CoreError::Interrupted { .. })));
        assert!(orch.journal().is_empty());
    }

    #[test]
    fn best_effort_swallows_failures() {
        let mock = MockProvider::new();
        mock.fail_on("upload_artifacts", "bucket gone");
        let orch = Orchestrator::new(
            config(),
            Arc::new(mock.clone()),
            Arc::new(MemoryStateStore::new()),
            StopSignal::new(),
        )
        .unwrap();
        let provider = mock.clone();
        assert!(!orch.best_effort(Saga::Up, "upload artifacts", move || {
            kubetester_provider::ArtifactSink::upload_artifacts(&provider)
        }));
        assert_eq!(orch.journal()[0].status, RecordStatus::Failed);
    }

    #[test]
    fn read_only_open_never_saves() {
        let mut doc = StateDocument::new("orch");
        doc.up = true;
        let store = MemoryStateStore::with_document(doc);
        let mock = MockProvider::new();
        let orch = Orchestrator::open_read_only(
            config(),
            Arc::new(mock.clone()),
            Arc::new(store.clone()),
            StopSignal::new(),
        )
        .unwrap();
        assert!(orch.is_read_only());
        assert!(orch.is_up().unwrap());
        assert!(matches!(orch.up(), Err(CoreError::ReadOnly(_))));
        assert!(matches!(orch.down(), Err(CoreError::ReadOnly(_))));
        assert_eq!(store.saves(), 0);
        assert!(mock.destructive_calls().is_empty());
    }

    #[test]
    fn is_up_false_without_health_check() {
        let mock = MockProvider::new();
        let orch = Orchestrator::new(
            config(),
            Arc::new(mock.clone()),
            Arc::new(MemoryStateStore::new()),
            StopSignal::new(),
        )
        .unwrap();
        assert!(!orch.is_up().unwrap());
        assert_eq!(mock.count("check_health"), 0);
    }
}
