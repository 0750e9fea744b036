use kubetester_config::{
    AddOnConfig, AddOnKind, EnvironmentConfig, ImageFamily, NodeGroupKind, NodeGroupSpec,
    ResourceKind, Timings,
};
use kubetester_core::{CoreError, Orchestrator, RecordStatus, Saga, StopOrigin, StopSignal};
use kubetester_provider::MockProvider;
use kubetester_store::{MemoryStateStore, StateDocument};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(add_ons: &[&str]) -> EnvironmentConfig {
    let mut config = EnvironmentConfig::template("saga-test", "us-west-2");
    config.timings = Timings::immediate();
    config.on_failure.delete_wait_secs = 0;
    for name in add_ons {
        config.add_ons.insert(
            (*name).to_owned(),
            AddOnConfig {
                enable: true,
                ..AddOnConfig::default()
            },
        );
    }
    config
}

struct Harness {
    mock: MockProvider,
    store: MemoryStateStore,
    stop: StopSignal,
}

impl Harness {
    fn new() -> Self {
        Self {
            mock: MockProvider::new(),
            store: MemoryStateStore::new(),
            stop: StopSignal::new(),
        }
    }

    fn with_state(doc: StateDocument) -> Self {
        Self {
            store: MemoryStateStore::with_document(doc),
            ..Self::new()
        }
    }

    fn orchestrator(&self, config: EnvironmentConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::new(self.mock.clone()),
            Arc::new(self.store.clone()),
            self.stop.clone(),
        )
        .unwrap()
    }

    fn pos(&self, call: &str) -> usize {
        self.mock
            .position(call)
            .unwrap_or_else(|| panic!("call '{call}' not made; calls: {:?}", self.mock.calls()))
    }
}

fn label_pos(labels: &[String], label: &str) -> usize {
    labels
        .iter()
        .position(|l| l == label)
        .unwrap_or_else(|| panic!("'{label}' not in journal: {labels:?}"))
}

#[test]
fn up_then_down_full_lifecycle() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo"]));

    orch.up().unwrap();

    let state = orch.state();
    assert!(state.up);
    for kind in [
        ResourceKind::Bucket,
        ResourceKind::KeyPair,
        ResourceKind::ClusterRole,
        ResourceKind::Network,
        ResourceKind::Cluster,
    ] {
        assert!(state.resource_created(kind), "{kind} should be created");
    }
    assert!(!state.resource_created(ResourceKind::EncryptionKey));
    assert!(state.node_group_created(NodeGroupKind::Unmanaged));
    assert!(state.add_on_created(AddOnKind::JobsEcho));
    assert_eq!(state.cluster.arn.as_deref(), Some("arn:mock:eks:cluster/mock"));
    assert!(h.mock.destructive_calls().is_empty());

    assert!(h.pos("create bucket") < h.pos("create cluster"));
    assert!(h.pos("create cluster") < h.pos("create node_group:unmanaged"));
    assert!(h.pos("create node_group:unmanaged") < h.pos("create add_on:jobs_echo"));

    h.mock.clear_calls();
    orch.down().unwrap();

    let order = [
        "delete key_pair",
        "delete add_on:jobs_echo",
        "delete node_group:unmanaged",
        "delete cluster",
        "delete cluster_role",
        "delete network",
        "delete bucket",
    ];
    assert_eq!(h.mock.destructive_calls(), order);

    let state = orch.state();
    assert!(!state.up);
    assert!(!state.anything_created());
    assert!(state.cluster.arn.is_none());
}

#[test]
fn down_settles_after_each_add_on_and_before_network() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo", "nlb_hello_world"]));
    orch.up().unwrap();
    orch.down().unwrap();

    let labels = orch.journal_labels(Saga::Down);
    let echo = label_pos(&labels, "step delete add_on:jobs_echo");
    assert_eq!(labels[echo + 1], "settle add_on:jobs_echo cleanup");

    let nlb = label_pos(&labels, "step delete add_on:nlb_hello_world");
    assert!(echo < nlb, "load balancer add-ons go last");
    assert_eq!(labels[nlb + 1], "settle add_on:nlb_hello_world cleanup");
    let lb_release = label_pos(&labels, "settle load balancer release");
    assert!(nlb < lb_release);
    assert!(lb_release < label_pos(&labels, "step delete node_group:unmanaged"));

    let network_release = label_pos(&labels, "settle network release");
    assert_eq!(labels[network_release + 1], "step delete network");
}

#[test]
fn second_down_makes_no_destructive_calls() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo", "irsa"]));
    orch.up().unwrap();
    orch.down().unwrap();

    h.mock.clear_calls();
    orch.down().unwrap();
    assert!(h.mock.destructive_calls().is_empty());
}

#[test]
fn down_on_fresh_environment_is_a_no_op() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo"]));
    orch.down().unwrap();
    assert!(h.mock.destructive_calls().is_empty());
    assert_eq!(h.mock.calls(), vec!["upload_artifacts"]);
}

#[test]
fn up_is_a_no_op_when_already_up() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&[]));
    orch.up().unwrap();
    h.mock.clear_calls();
    orch.up().unwrap();
    assert!(h.mock.calls().is_empty());
}

#[test]
fn cluster_add_ons_precede_health_check_and_workloads() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo", "csi_ebs"]));
    orch.up().unwrap();

    let calls = h.mock.calls();
    let csi = h.pos("create add_on:csi_ebs");
    let echo = h.pos("create add_on:jobs_echo");
    assert!(csi < echo);
    assert!(
        calls[csi..echo].iter().any(|c| c == "check_health"),
        "health gate between tiers: {calls:?}"
    );
}

#[test]
fn failure_aborts_and_compensates_only_created_steps() {
    let h = Harness::new();
    h.mock.fail_on("create add_on:jobs_echo", "job quota exceeded");
    let orch = h.orchestrator(config(&["jobs_echo", "cron_jobs"]));

    let err = orch.up().unwrap_err();
    assert!(
        matches!(err, CoreError::Step { ref step, .. } if step == "create add_on:jobs_echo"),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains("job quota exceeded"));

    assert_eq!(h.mock.count("create add_on:cron_jobs"), 0);
    assert_eq!(h.mock.count("create add_on:jobs_echo"), 1);

    let deletes = h.mock.destructive_calls();
    assert!(!deletes.contains(&"delete add_on:jobs_echo".to_owned()));
    assert!(!deletes.contains(&"delete add_on:cron_jobs".to_owned()));
    assert!(!deletes.contains(&"delete encryption_key".to_owned()));
    assert_eq!(h.mock.count("delete cluster"), 1);
    assert_eq!(h.mock.count("delete node_group:unmanaged"), 1);

    let state = orch.state();
    assert!(!state.up);
    assert!(!state.anything_created());
}

#[test]
fn compensation_failure_still_returns_original_error() {
    let h = Harness::new();
    h.mock.fail_on("create node_group:unmanaged", "no capacity");
    h.mock.fail_on("delete network", "dependency violation");
    let orch = h.orchestrator(config(&[]));

    let err = orch.up().unwrap_err();
    assert!(matches!(err, CoreError::Step { ref step, .. } if step == "create node_group:unmanaged"));
    assert_eq!(h.mock.count("delete cluster"), 1);
    assert_eq!(h.mock.count("delete network"), 1);
    assert!(orch.state().resource_created(ResourceKind::Network));
}

#[test]
fn no_compensation_when_on_failure_delete_is_off() {
    let h = Harness::new();
    h.mock.fail_on("create add_on:irsa", "oidc provider missing");
    let mut config = config(&["irsa"]);
    config.on_failure.delete = false;
    let orch = h.orchestrator(config);

    assert!(orch.up().is_err());
    assert!(h.mock.destructive_calls().is_empty());
    assert!(orch.state().resource_created(ResourceKind::Cluster));
}

#[test]
fn control_plane_failure_without_compensation_stops_before_node_groups() {
    let h = Harness::new();
    h.mock.fail_on("create cluster", "control plane quota exceeded");
    let mut config = config(&["jobs_echo"]);
    config.on_failure.delete = false;
    let orch = h.orchestrator(config);

    let err = orch.up().unwrap_err();
    assert!(
        matches!(err, CoreError::Step { ref step, .. } if step == "create cluster"),
        "unexpected error: {err}"
    );
    assert_eq!(h.mock.count("create node_group:unmanaged"), 0);
    assert_eq!(h.mock.count("create add_on:jobs_echo"), 0);
    assert!(h.mock.destructive_calls().is_empty());

    let state = orch.state();
    assert!(!state.up);
    assert!(!state.resource_created(ResourceKind::Cluster));
    assert!(state.resource_created(ResourceKind::Network));
}

#[test]
fn control_plane_failure_compensates_prerequisites_only() {
    let h = Harness::new();
    h.mock.fail_on("create cluster", "control plane quota exceeded");
    let orch = h.orchestrator(config(&[]));

    assert!(orch.up().is_err());
    assert_eq!(h.mock.count("delete cluster"), 0);
    assert_eq!(h.mock.count("delete node_group:unmanaged"), 0);
    assert_eq!(h.mock.count("delete network"), 1);
    assert_eq!(h.mock.count("delete bucket"), 1);
    assert!(!orch.state().anything_created());
}

#[test]
fn concurrent_down_calls_do_not_overlap() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo"]));
    orch.up().unwrap();

    let in_flight = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    {
        let in_flight = Arc::clone(&in_flight);
        let overlaps = Arc::clone(&overlaps);
        h.mock.on_call("delete cluster", move || {
            if in_flight.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(50));
            in_flight.store(false, Ordering::SeqCst);
        });
    }

    std::thread::scope(|s| {
        let first = s.spawn(|| orch.down());
        let second = s.spawn(|| orch.down());
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();
    });

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(h.mock.count("delete cluster"), 1);
    assert!(!orch.state().anything_created());
}

#[test]
fn teardown_collects_every_failure() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo"]));
    orch.up().unwrap();

    h.mock.fail_on("delete network", "eni still attached");
    h.mock.fail_on("delete bucket", "bucket not empty");
    let err = orch.down().unwrap_err();
    let CoreError::Teardown(errors) = err else {
        panic!("expected teardown error");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("eni still attached"));
    assert!(errors[1].contains("bucket not empty"));
    assert_eq!(h.mock.count("delete cluster"), 1);
    assert!(!orch.state().up);

    h.mock.clear_calls();
    assert!(orch.down().is_err());
    assert_eq!(
        h.mock.destructive_calls(),
        vec!["delete network", "delete bucket"]
    );
}

#[test]
fn stop_during_step_finishes_and_records_it() {
    let h = Harness::new();
    let stop = h.stop.clone();
    h.mock.on_call("create cluster", move || {
        stop.request_stop();
        stop.fire(StopOrigin::Signal);
    });
    let mut config = config(&["jobs_echo"]);
    config.on_failure.delete = false;
    let orch = h.orchestrator(config);

    let err = orch.up().unwrap_err();
    assert!(
        matches!(
            err,
            CoreError::Interrupted { origin: StopOrigin::Requested, ref step } if step == "create cluster"
        ),
        "unexpected error: {err}"
    );
    let state = orch.state();
    assert!(state.resource_created(ResourceKind::Cluster));
    assert!(state.cluster.endpoint.is_some());
    assert_eq!(h.mock.count("create node_group:unmanaged"), 0);

    let interrupted = orch
        .journal()
        .iter()
        .filter(|r| r.status == RecordStatus::Interrupted)
        .count();
    assert_eq!(interrupted, 1);
}

#[test]
fn stop_during_up_still_compensates_fully() {
    let h = Harness::new();
    let stop = h.stop.clone();
    h.mock.on_call("create node_group:unmanaged", move || {
        stop.fire(StopOrigin::Signal);
    });
    let orch = h.orchestrator(config(&["jobs_echo"]));

    assert!(orch.up().unwrap_err().is_interrupted());
    assert_eq!(h.mock.count("delete node_group:unmanaged"), 1);
    assert_eq!(h.mock.count("delete cluster"), 1);
    assert_eq!(h.mock.count("delete bucket"), 1);
    assert!(!orch.state().anything_created());
}

#[test]
fn down_ignores_stop_and_deletes_everything() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&["jobs_echo"]));
    orch.up().unwrap();

    h.stop.fire(StopOrigin::Signal);
    h.mock.clear_calls();
    orch.down().unwrap();
    assert_eq!(h.mock.destructive_calls().len(), 7);
}

#[test]
fn missing_handle_is_fatal_on_up() {
    let h = Harness::new();
    h.mock.without_handle("add_on:jobs_echo");
    let mut config = config(&["jobs_echo"]);
    config.on_failure.delete = false;
    let orch = h.orchestrator(config);

    let err = orch.up().unwrap_err();
    assert!(matches!(err, CoreError::MissingHandle(ref n) if n == "add_on:jobs_echo"));
    assert!(orch.state().node_group_created(NodeGroupKind::Unmanaged));
}

#[test]
fn missing_handle_for_created_add_on_is_fatal_on_down() {
    let mut doc = StateDocument::new("saga-test");
    doc.set_add_on_created(AddOnKind::JobsEcho, true);
    let h = Harness::with_state(doc);
    h.mock.without_handle("add_on:jobs_echo");
    let orch = h.orchestrator(config(&["jobs_echo"]));

    assert!(matches!(orch.down(), Err(CoreError::MissingHandle(_))));
    assert!(orch.state().add_on_created(AddOnKind::JobsEcho));
}

#[test]
fn disabled_but_created_add_on_is_still_deleted() {
    let mut doc = StateDocument::new("saga-test");
    doc.set_add_on_created(AddOnKind::Irsa, true);
    let h = Harness::with_state(doc);
    let orch = h.orchestrator(config(&[]));

    orch.down().unwrap();
    assert_eq!(h.mock.destructive_calls(), vec!["delete add_on:irsa"]);
}

#[test]
fn externally_supplied_prerequisites_are_left_alone() {
    let h = Harness::new();
    let mut config = config(&[]);
    config.prerequisites.create_network = false;
    config.prerequisites.create_bucket = false;
    let orch = h.orchestrator(config);
    orch.up().unwrap();
    orch.down().unwrap();

    assert_eq!(h.mock.count("create network"), 0);
    assert_eq!(h.mock.count("delete network"), 0);
    assert_eq!(h.mock.count("delete bucket"), 0);
    assert!(!orch
        .journal_labels(Saga::Down)
        .contains(&"settle network release".to_owned()));
}

fn gpu_config() -> EnvironmentConfig {
    let mut config = config(&[]);
    config.managed_node_groups.enable = true;
    config.managed_node_groups.groups = vec![NodeGroupSpec {
        name: "gpu-ng".to_owned(),
        image_family: ImageFamily::Al2X86_64Gpu,
        desired_nodes: Some(1),
    }];
    config
}

#[test]
fn gpu_node_groups_bootstrap_drivers() {
    let h = Harness::new();
    let orch = h.orchestrator(gpu_config());
    orch.up().unwrap();

    assert!(h.pos("create node_group:managed") < h.pos("install_gpu_driver"));
    assert!(h.pos("install_gpu_driver") < h.pos("gpu_smoke_test"));
}

#[test]
fn gpu_bootstrap_without_handle_is_fatal() {
    let h = Harness::new();
    h.mock.without_handle("gpu");
    let mut config = gpu_config();
    config.on_failure.delete = false;
    let orch = h.orchestrator(config);

    assert!(matches!(orch.up(), Err(CoreError::MissingHandle(ref n)) if n == "gpu"));
}

#[test]
fn no_gpu_bootstrap_for_cpu_images() {
    let h = Harness::new();
    h.orchestrator(config(&[])).up().unwrap();
    assert_eq!(h.mock.count("install_gpu_driver"), 0);
}

#[test]
fn logs_fetched_then_results_aggregated() {
    let h = Harness::new();
    let mut config = config(&["stresser_remote", "jobs_pi"]);
    config.node_groups.fetch_logs = true;
    let orch = h.orchestrator(config);
    orch.up().unwrap();

    let fetch = h.pos("fetch_logs node_group:unmanaged");
    assert!(fetch < h.pos("aggregate add_on:stresser_remote"));
    assert_eq!(h.mock.count("aggregate add_on:jobs_pi"), 0);
}

#[test]
fn failed_log_fetch_skips_aggregation_without_failing_up() {
    let h = Harness::new();
    h.mock.fail_on("fetch_logs node_group:unmanaged", "ssm unavailable");
    let mut config = config(&["stresser_remote"]);
    config.node_groups.fetch_logs = true;
    let orch = h.orchestrator(config);

    orch.up().unwrap();
    assert_eq!(h.mock.count("aggregate add_on:stresser_remote"), 0);
}

#[test]
fn failed_artifact_upload_does_not_fail_up() {
    let h = Harness::new();
    h.mock.fail_on("upload_artifacts", "access denied");
    let orch = h.orchestrator(config(&[]));
    orch.up().unwrap();
    assert!(orch.state().up);
}

#[test]
fn is_up_requires_health() {
    let h = Harness::new();
    let orch = h.orchestrator(config(&[]));
    assert!(!orch.is_up().unwrap());

    orch.up().unwrap();
    assert!(orch.is_up().unwrap());

    h.mock.fail_on("check_health", "apiserver unreachable");
    assert!(orch.is_up().is_err());
}

#[test]
fn dump_cluster_logs_visits_created_node_groups() {
    let h = Harness::new();
    let mut config = config(&[]);
    config.managed_node_groups.enable = true;
    let orch = h.orchestrator(config);

    orch.dump_cluster_logs().unwrap();
    assert_eq!(h.mock.count("fetch_logs node_group:unmanaged"), 0);

    orch.up().unwrap();
    h.mock.clear_calls();
    orch.dump_cluster_logs().unwrap();
    assert_eq!(
        h.mock.calls(),
        vec![
            "fetch_logs node_group:unmanaged",
            "fetch_logs node_group:managed"
        ]
    );

    h.mock.fail_on("fetch_logs node_group:unmanaged", "timeout");
    h.mock.clear_calls();
    assert!(orch.dump_cluster_logs().is_err());
    assert_eq!(h.mock.count("fetch_logs node_group:managed"), 0);
}
