//! Parallel loader: ordering, partial failure, deadlines and per-name serialization.

mod common;

use common::*;
use econlab_runner::{
    load_parallel, CacheState, ExecutionStrategy, LoadError, LoadFlags, LoadOutcome, LoadProgress,
    ParallelOptions, ReconcileConfig, Reconciler,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn setup(retriever: ScriptedRetriever) -> (Arc<Reconciler>, Arc<CountingStore>, Arc<ScriptedRetriever>) {
    let store = Arc::new(CountingStore::new());
    let retriever = Arc::new(retriever);
    let rec = Reconciler::new(
        Arc::new(registry()),
        store.clone(),
        retriever.clone(),
        ReconcileConfig::default(),
    );
    (Arc::new(rec), store, retriever)
}

fn standard_sources() -> ScriptedRetriever {
    ScriptedRetriever::new()
        .with("cpi", raw_monthly(1, &[100.0, 101.0, 102.0]))
        .with("nxr", raw_monthly(1, &[39.5, 40.1]))
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: AtomicUsize,
    batch: AtomicUsize,
}

impl LoadProgress for Recorder {
    fn on_start(&self, _name: &str, _index: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_complete(&self, _name: &str, _index: usize, _total: usize, _result: Result<&LoadOutcome, &LoadError>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_complete(&self, _succeeded: usize, failed: usize, _total: usize) {
        self.batch.store(failed + 100, Ordering::SeqCst);
    }
}

fn check_partial_failure(strategy: ExecutionStrategy) {
    let (rec, _, _) = setup(standard_sources());
    let requested = names(&["cpi", "bad_name_triggers_failure", "nxr"]);
    let opts = ParallelOptions { strategy, ..ParallelOptions::default() };
    let recorder = Recorder::default();

    let batch = load_parallel(&rec, &requested, &opts, Some(&recorder as &dyn LoadProgress)).unwrap();
    let order: Vec<&str> = batch.results.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, ["cpi", "bad_name_triggers_failure", "nxr"]);

    let ok: Vec<&str> = batch.successes().map(|(n, _)| n).collect();
    assert_eq!(ok, ["cpi", "nxr"]);
    let errors: Vec<(&str, &LoadError)> = batch.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "bad_name_triggers_failure");
    assert!(matches!(errors[0].1, LoadError::UnknownDataset { .. }));

    let (_, cpi) = batch.successes().next().unwrap();
    assert_eq!(cpi.dataset.len(), 3);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.batch.load(Ordering::SeqCst), 101);
}

#[test]
fn threads_keep_request_order_and_isolate_failures() {
    check_partial_failure(ExecutionStrategy::Threads);
}

#[test]
fn pool_keeps_request_order_and_isolates_failures() {
    check_partial_failure(ExecutionStrategy::Pool { workers: Some(2) });
}

#[test]
fn fail_on_error_turns_any_failure_into_an_error() {
    let (rec, _, _) = setup(standard_sources());
    let opts = ParallelOptions { fail_on_error: true, ..ParallelOptions::default() };
    let err = load_parallel(&rec, &names(&["cpi", "bad_name_triggers_failure", "nxr"]), &opts, None)
        .unwrap_err();
    match err {
        LoadError::BatchFailed { failed, total } => {
            assert_eq!(failed, vec!["bad_name_triggers_failure".to_string()]);
            assert_eq!(total, 3);
        }
        other => panic!("unexpected error {other}"),
    }

    let ok = load_parallel(&rec, &names(&["cpi", "nxr"]), &opts, None).unwrap();
    assert_eq!(ok.failed(), 0);
}

#[test]
fn deadline_abandons_slow_loads() {
    let sources = standard_sources().with_delay("slow", raw_monthly(1, &[1.0]), Duration::from_secs(3));
    let (rec, _, _) = setup(sources);
    let opts = ParallelOptions {
        deadline: Some(Duration::from_millis(300)),
        ..ParallelOptions::default()
    };

    let batch = load_parallel(&rec, &names(&["cpi", "slow", "nxr"]), &opts, None).unwrap();
    assert!(batch.results[0].1.is_ok());
    assert!(matches!(batch.results[1].1, Err(LoadError::TimedOut { .. })));
    assert!(batch.results[2].1.is_ok());
}

#[test]
fn same_name_loads_are_serialized() {
    let (rec, store, retriever) = setup(standard_sources());
    let requested = names(&["cpi"; 8]);
    let opts = ParallelOptions {
        strategy: ExecutionStrategy::Pool { workers: Some(4) },
        ..ParallelOptions::default()
    };

    let batch = load_parallel(&rec, &requested, &opts, None).unwrap();
    assert_eq!(batch.failed(), 0);
    // The first load fetches and writes; the rest find a fresh cache.
    assert_eq!(retriever.calls("cpi"), 1);
    assert_eq!(store.writes(), 1);
    let fresh = batch
        .successes()
        .filter(|(_, o)| o.state == CacheState::CacheFresh)
        .count();
    assert_eq!(fresh, 7);
}

#[test]
fn flags_and_transforms_reach_every_task() {
    let values: Vec<f64> = (1..=6).map(f64::from).collect();
    let sources = standard_sources().with("wages", raw_monthly(1, &values));
    let (rec, store, _) = setup(sources);
    let opts = ParallelOptions {
        flags: LoadFlags { skip_cache: true, ..LoadFlags::default() },
        transform: true,
        ..ParallelOptions::default()
    };

    let batch = load_parallel(&rec, &names(&["wages", "cpi"]), &opts, None).unwrap();
    assert_eq!(store.reads(), 0);
    assert_eq!(store.writes(), 0);
    let (_, wages) = batch.successes().next().unwrap();
    assert_eq!(wages.dataset.len(), 2);
}
