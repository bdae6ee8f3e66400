use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mprtp_scenarios::{Algorithm, ScenarioError, ScenarioKey, ScenarioRegistry};
use mprtp_tester::archive::archive_dir_name;
use mprtp_tester::batch::{BatchError, BatchRequest, BatchRunner, CollaboratorFactory};
use mprtp_tester::cancel::CancellationGate;
use mprtp_tester::config::TesterConfig;
use mprtp_tester::lifecycle::{Collaborators, StopOutcome};
use mprtp_tester::test_util::{default_params, fake_collaborators_with, Probe};

const RUN_ID: &str = "ABC123";

fn runner(root: &Path) -> (BatchRunner, Probe, TesterConfig) {
    let config = TesterConfig {
        results_dir: root.join("temp"),
        archive_root: root.join("temp_super"),
        ..Default::default()
    };
    let (collab, probe) =
        fake_collaborators_with(std::time::Duration::ZERO, Some(config.results_dir.clone()));
    let gate = Arc::new(CancellationGate::new(Arc::new(|_code: i32| {})));
    let runner = BatchRunner::new(ScenarioRegistry::standard(), collab, gate, &config)
        .with_run_id(RUN_ID);
    (runner, probe, config)
}

fn request(keys: &[&str], runs: u32) -> BatchRequest {
    BatchRequest {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        runs,
        params: default_params(),
    }
}

#[tokio::test(start_paused = true)]
async fn two_scenarios_archive_into_distinct_directories() {
    let root = tempfile::tempdir().unwrap();
    let (runner, probe, config) = runner(root.path());
    assert_eq!(runner.run_id(), RUN_ID);

    let dir_name = archive_dir_name(Algorithm::Fractal, RUN_ID, 0, &[50], &[0], 2);
    assert_eq!(dir_name, "FRACTaL_ABC123_0_50ms_0ms_2");

    // Leftovers from an earlier invocation with the same name.
    let stale_dir = config.archive_root.join("rmcat1").join(&dir_name);
    fs::create_dir_all(&stale_dir).unwrap();
    fs::write(stale_dir.join("old.csv"), "stale").unwrap();

    let records = runner.run(&request(&["rmcat1", "mprtp1"], 1)).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(probe.count("helpers.start"), 2);
    assert_eq!(probe.evaluations(), 2);

    let rmcat = records[0].archive.as_ref().unwrap();
    let mprtp = records[1].archive.as_ref().unwrap();
    assert_eq!(records[0].key, ScenarioKey::Rmcat1);
    assert_eq!(records[1].key, ScenarioKey::Mprtp1);
    assert!(records.iter().all(|r| r.outcome == StopOutcome::Ran));
    assert_ne!(rmcat.target, mprtp.target);

    assert_eq!(rmcat.target, stale_dir);
    assert_eq!(rmcat.cleared, 1);
    assert!(!stale_dir.join("old.csv").exists());
    assert!(stale_dir.join("rmcat1_stats.csv").is_file());

    let mprtp_dir = config.archive_root.join("mprtp1").join(&dir_name);
    assert_eq!(mprtp.target, mprtp_dir);
    assert!(mprtp_dir.join("mprtp1_stats.csv").is_file());
    // The first run's artifact did not leak into the second archive.
    assert!(!mprtp_dir.join("rmcat1_stats.csv").exists());

    assert!(fs::read_dir(&config.results_dir).unwrap().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn repeated_runs_get_their_own_index() {
    let root = tempfile::tempdir().unwrap();
    let (runner, _probe, config) = runner(root.path());

    let records = runner.run(&request(&["rmcat2"], 2)).await.unwrap();

    let indices: Vec<u32> = records.iter().map(|r| r.run_index).collect();
    assert_eq!(indices, vec![0, 1]);
    for record in &records {
        let name = archive_dir_name(Algorithm::Fractal, RUN_ID, record.run_index, &[50], &[0], 2);
        let dir = config.archive_root.join("rmcat2").join(name);
        assert!(dir.join("rmcat2_stats.csv").is_file());
    }
}

#[tokio::test(start_paused = true)]
async fn single_run_leaves_artifacts_in_place() {
    let root = tempfile::tempdir().unwrap();
    let (runner, _probe, config) = runner(root.path());

    let records = runner.run(&request(&["rmcat3"], 1)).await.unwrap();

    assert!(records[0].archive.is_none());
    assert!(config.results_dir.join("rmcat3_stats.csv").is_file());
    assert!(!config.archive_root.exists());
}

#[tokio::test(start_paused = true)]
async fn unknown_key_aborts_before_any_run() {
    let root = tempfile::tempdir().unwrap();
    let (runner, probe, _config) = runner(root.path());

    let err = runner
        .run(&request(&["rmcat1", "rmcat99"], 1))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BatchError::Scenario(ScenarioError::UnknownScenario(ref key)) if key == "rmcat99"
    ));
    assert_eq!(probe.count("helpers.start"), 0);
    assert!(probe.events().is_empty());
}

/// Hands out a new fake set per call and counts the calls.
struct CountingFactory {
    built: Arc<AtomicUsize>,
    collaborators: Collaborators,
}

impl CollaboratorFactory for CountingFactory {
    fn collaborators(&self) -> Collaborators {
        self.built.fetch_add(1, Ordering::SeqCst);
        self.collaborators.clone()
    }
}

#[tokio::test(start_paused = true)]
async fn every_run_gets_its_own_collaborators() {
    let root = tempfile::tempdir().unwrap();
    let config = TesterConfig {
        results_dir: root.path().join("temp"),
        archive_root: root.path().join("temp_super"),
        ..Default::default()
    };
    let (collaborators, probe) =
        fake_collaborators_with(std::time::Duration::ZERO, Some(config.results_dir.clone()));
    let built = Arc::new(AtomicUsize::new(0));
    let factory = CountingFactory {
        built: built.clone(),
        collaborators,
    };
    let gate = Arc::new(CancellationGate::new(Arc::new(|_code: i32| {})));
    let runner = BatchRunner::new(ScenarioRegistry::standard(), factory, gate, &config);

    runner.run(&request(&["rmcat1", "mprtp2"], 2)).await.unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 4);
    assert_eq!(probe.count("helpers.start"), 4);
}
