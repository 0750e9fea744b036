use kubetester_config::{AddOnConfig, AddOnKind, EnvironmentConfig, ResourceKind, Timings};
use kubetester_core::{CoreError, Orchestrator, StateLock, StopSignal};
use kubetester_provider::MockProvider;
use kubetester_store::{FileStateStore, StateLayout, StateStore};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn config(name: &str) -> EnvironmentConfig {
    let mut config = EnvironmentConfig::template(name, "us-east-1");
    config.timings = Timings::immediate();
    config.on_failure.delete = false;
    config.add_ons.insert(
        "jobs_echo".to_owned(),
        AddOnConfig {
            enable: true,
            ..AddOnConfig::default()
        },
    );
    config
}

fn orchestrator(config: EnvironmentConfig, mock: &MockProvider, root: &Path) -> Orchestrator {
    let store = FileStateStore::new(StateLayout::new(root), &config.name);
    Orchestrator::new(
        config,
        Arc::new(mock.clone()),
        Arc::new(store),
        StopSignal::new(),
    )
    .unwrap()
}

#[test]
fn rerun_resumes_after_partial_failure() {
    let dir = tempfile::tempdir().unwrap();

    let failing = MockProvider::new();
    failing.fail_on("create add_on:jobs_echo", "image pull backoff");
    let first = orchestrator(config("resume"), &failing, dir.path());
    assert!(first.up().is_err());
    drop(first);

    let healthy = MockProvider::new();
    let second = orchestrator(config("resume"), &healthy, dir.path());
    second.up().unwrap();

    assert_eq!(healthy.count("create cluster"), 0);
    assert_eq!(healthy.count("create bucket"), 0);
    assert_eq!(healthy.count("create node_group:unmanaged"), 0);
    assert_eq!(healthy.count("create add_on:jobs_echo"), 1);

    let on_disk = FileStateStore::new(StateLayout::new(dir.path()), "resume")
        .load()
        .unwrap()
        .unwrap();
    assert!(on_disk.up);
    assert!(on_disk.add_on_created(AddOnKind::JobsEcho));
    assert!(on_disk.checksum.is_some());
}

#[test]
fn down_from_a_new_process_deletes_what_was_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::new();
    orchestrator(config("handoff"), &mock, dir.path()).up().unwrap();

    let later = MockProvider::new();
    let mut disabled = config("handoff");
    disabled.add_ons.clear();
    orchestrator(disabled, &later, dir.path()).down().unwrap();

    assert!(later
        .destructive_calls()
        .contains(&"delete add_on:jobs_echo".to_owned()));
    assert_eq!(later.count("delete cluster"), 1);

    let doc = FileStateStore::new(StateLayout::new(dir.path()), "handoff")
        .load()
        .unwrap()
        .unwrap();
    assert!(!doc.up);
    assert!(!doc.resource_created(ResourceKind::Cluster));
}

#[test]
fn state_of_another_environment_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::new();
    orchestrator(config("alpha"), &mock, dir.path()).up().unwrap();

    // Point a differently-named config at alpha's state file.
    let store = FileStateStore::new(StateLayout::new(dir.path()), "alpha");
    let result = Orchestrator::new(
        config("beta"),
        Arc::new(mock),
        Arc::new(store),
        StopSignal::new(),
    );
    assert!(matches!(result, Err(CoreError::StateMismatch { .. })));
}

#[test]
fn state_lock_excludes_second_saga() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StateLayout::new(dir.path());
    let _held = StateLock::try_acquire(&layout.lock_file("locked")).unwrap();
    assert!(matches!(
        StateLock::try_acquire(&layout.lock_file("locked")),
        Err(CoreError::Locked(_))
    ));
}

fn hook_config(dir: &Path) -> EnvironmentConfig {
    let mut config = config("hooks");
    config.hooks.after_create_cluster = Some("echo {{name}} {{cluster_arn}}".to_owned());
    config.hooks.after_create_cluster_output = Some(dir.join("out").join("cluster.log"));
    config
}

#[test]
fn hook_output_records_command_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::new();
    orchestrator(hook_config(dir.path()), &mock, dir.path())
        .up()
        .unwrap();

    let body = fs::read_to_string(dir.path().join("out").join("cluster.log")).unwrap();
    let command = "echo hooks arn:mock:eks:cluster/mock";
    assert_eq!(body, format!("{command}\n\n# output\nmock-run: {command}\n"));
    assert!(mock.position(&format!("run {command}")).unwrap() < mock.position("create node_group:unmanaged").unwrap());
}

#[test]
fn failed_hook_is_recorded_but_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::new();
    mock.fail_on("run echo hooks arn:mock:eks:cluster/mock", "kubectl exploded");
    let orch = orchestrator(hook_config(dir.path()), &mock, dir.path());
    orch.up().unwrap();

    let body = fs::read_to_string(dir.path().join("out").join("cluster.log")).unwrap();
    assert!(body.contains("kubectl exploded"));
    assert!(body.contains("\n\n# error\n"));
    assert!(orch.state().up);
}

#[test]
fn unwritable_hook_output_fails_up() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();

    let mut config = config("hooks");
    config.hooks.after_create_add_ons = Some("true".to_owned());
    config.hooks.after_create_add_ons_output = Some(blocker.join("add-ons.log"));
    let orch = orchestrator(config, &MockProvider::new(), dir.path());

    assert!(matches!(orch.up(), Err(CoreError::HookOutput { .. })));
    assert!(!orch.state().up);
}
