// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status of pool-managed workers, for the progress surface.
//!
//! Each worker owns one [`WorkerStatus`], which records the test it is running, that test's
//! state, and the cluster it was given. The triple is always replaced as a whole so that readers
//! never see a test paired with another test's cluster.

use crate::test_state::TestState;
use clustertest_metadata::{TestRunSummary, WorkerSummary};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

/// Which run of which test a worker is executing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestToRun {
    /// The name of the test.
    pub test_name: String,

    /// The 1-based index of this run.
    pub run_num: usize,

    /// The total number of runs of this test.
    pub run_count: usize,
}

/// A handle to the cluster assigned to a worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterHandle {
    /// The name of the cluster.
    pub name: String,

    /// The number of nodes in the cluster.
    pub node_count: usize,
}

/// A consistent copy of a worker's state.
#[derive(Clone, Debug)]
pub struct WorkerSnapshot {
    /// The worker's name.
    pub name: String,

    /// The free-form status string.
    pub status: String,

    /// The run being executed, if any.
    pub test_to_run: Option<TestToRun>,

    /// The state of the test being executed, if any.
    pub test: Option<Arc<TestState>>,

    /// The assigned cluster, if any.
    pub cluster: Option<ClusterHandle>,
}

/// The mutable status of one worker.
#[derive(Debug)]
pub struct WorkerStatus {
    name: String,
    inner: Mutex<WorkerStatusInner>,
}

#[derive(Debug, Default)]
struct WorkerStatusInner {
    status: String,
    test_to_run: Option<TestToRun>,
    test: Option<Arc<TestState>>,
    cluster: Option<ClusterHandle>,
}

impl WorkerStatus {
    /// Creates the status of an idle worker.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(WorkerStatusInner::default()),
        }
    }

    /// The worker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds a run, its test state and its cluster to this worker, replacing any previous binding.
    pub fn assign(&self, test_to_run: TestToRun, test: Arc<TestState>, cluster: ClusterHandle) {
        debug!(
            worker = %self.name,
            test = %test_to_run.test_name,
            cluster = %cluster.name,
            "assigning test to worker"
        );
        let mut inner = self.lock();
        inner.test_to_run = Some(test_to_run);
        inner.test = Some(test);
        inner.cluster = Some(cluster);
    }

    /// Removes the current binding. The status string is kept.
    pub fn clear_assignment(&self) {
        let mut inner = self.lock();
        inner.test_to_run = None;
        inner.test = None;
        inner.cluster = None;
    }

    /// Sets the free-form status string.
    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().status = status.into();
    }

    /// The free-form status string.
    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    /// The run being executed, if any.
    pub fn test_to_run(&self) -> Option<TestToRun> {
        self.lock().test_to_run.clone()
    }

    /// The state of the test being executed, if any.
    pub fn test(&self) -> Option<Arc<TestState>> {
        self.lock().test.clone()
    }

    /// The assigned cluster, if any.
    pub fn cluster(&self) -> Option<ClusterHandle> {
        self.lock().cluster.clone()
    }

    /// Returns a copy of the whole state, taken under a single lock.
    pub fn snapshot(&self) -> WorkerSnapshot {
        let inner = self.lock();
        WorkerSnapshot {
            name: self.name.clone(),
            status: inner.status.clone(),
            test_to_run: inner.test_to_run.clone(),
            test: inner.test.clone(),
            cluster: inner.cluster.clone(),
        }
    }

    /// Renders the worker for the progress surface.
    pub fn summary(&self) -> WorkerSummary {
        let snapshot = self.snapshot();
        // The test state's locks are taken after the worker lock is released.
        let test = snapshot
            .test_to_run
            .zip(snapshot.test)
            .map(|(ttr, test)| TestRunSummary {
                name: ttr.test_name,
                run_num: ttr.run_num,
                run_count: ttr.run_count,
                main_status: test.main_status(),
                progress_percent: TestRunSummary::percent_from_fraction(test.main_progress()),
                failed: test.failed(),
            });

        WorkerSummary {
            name: snapshot.name,
            status: snapshot.status,
            test,
            cluster: snapshot.cluster.map(|c| c.name),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerStatusInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// All workers in a pool, by name.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Mutex<BTreeMap<String, Arc<WorkerStatus>>>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new idle worker called `name` and returns its status.
    ///
    /// A worker already registered under the same name is replaced.
    pub fn register(&self, name: impl Into<String>) -> Arc<WorkerStatus> {
        let status = Arc::new(WorkerStatus::new(name));
        self.lock()
            .insert(status.name().to_owned(), Arc::clone(&status));
        status
    }

    /// Removes the worker called `name`.
    pub fn unregister(&self, name: &str) -> Option<Arc<WorkerStatus>> {
        self.lock().remove(name)
    }

    /// Returns the worker called `name`.
    pub fn get(&self, name: &str) -> Option<Arc<WorkerStatus>> {
        self.lock().get(name).cloned()
    }

    /// Returns the number of registered workers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Summaries of every worker, sorted by name.
    pub fn summaries(&self) -> Vec<WorkerSummary> {
        let workers: Vec<_> = self.lock().values().cloned().collect();
        workers.iter().map(|worker| worker.summary()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<WorkerStatus>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::ClusterSpec,
        logger::MemoryLogger,
        owner::Owner,
        test_state::{TestDefinition, TestStateBuilder},
    };
    use pretty_assertions::assert_eq;
    use std::thread;

    fn test_state(name: &str) -> Arc<TestState> {
        let definition = TestDefinition::new(
            name,
            Owner::test_eng(),
            ClusterSpec {
                node_count: 4,
                cpus: 8,
            },
        );
        Arc::new(TestStateBuilder::new(definition, Arc::new(MemoryLogger::new()), "/a").build())
    }

    fn assignment(n: usize) -> (TestToRun, Arc<TestState>, ClusterHandle) {
        let name = format!("test-{n}");
        (
            TestToRun {
                test_name: name.clone(),
                run_num: n,
                run_count: n,
            },
            test_state(&name),
            ClusterHandle {
                name: format!("cluster-{n}"),
                node_count: 4,
            },
        )
    }

    #[test]
    fn summary_reflects_test_state() {
        let registry = WorkerRegistry::new();
        let worker = registry.register("w1");
        registry.register("w0");
        worker.set_status("running test");

        let (ttr, test, cluster) = assignment(1);
        test.report_status(test.main_unit(), "loading data");
        test.report_progress(test.main_unit(), 0.42);
        worker.assign(ttr, test, cluster);

        let summaries = registry.summaries();
        assert_eq!(
            summaries.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            ["w0", "w1"]
        );
        let summary = &summaries[1];
        assert_eq!(summary.status, "running test");
        assert_eq!(summary.cluster.as_deref(), Some("cluster-1"));
        let test = summary.test.as_ref().expect("test is bound");
        assert_eq!(test.name, "test-1");
        assert_eq!(test.progress_percent, 42);
        assert!(test.main_status.starts_with("loading data (set "));
        assert!(!test.failed);

        assert!(summaries[0].test.is_none());
    }

    #[test]
    fn clear_assignment_keeps_status() {
        let worker = WorkerStatus::new("w");
        let (ttr, test, cluster) = assignment(2);
        worker.assign(ttr, test, cluster);
        worker.set_status("tearing down");
        worker.clear_assignment();

        let snapshot = worker.snapshot();
        assert_eq!(snapshot.status, "tearing down");
        assert!(snapshot.test_to_run.is_none());
        assert!(snapshot.test.is_none());
        assert!(snapshot.cluster.is_none());
    }

    #[test]
    fn snapshots_never_mix_assignments() {
        let worker = WorkerStatus::new("w");
        let assignments: Vec<_> = (1..=4).map(assignment).collect();

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    for (ttr, test, cluster) in &assignments {
                        worker.assign(ttr.clone(), test.clone(), cluster.clone());
                    }
                }
            });
            s.spawn(|| {
                for _ in 0..1000 {
                    let snapshot = worker.snapshot();
                    if let (Some(ttr), Some(test), Some(cluster)) =
                        (snapshot.test_to_run, snapshot.test, snapshot.cluster)
                    {
                        assert_eq!(test.name(), ttr.test_name);
                        assert_eq!(cluster.name, ttr.test_name.replace("test", "cluster"));
                    }
                }
            });
        });
    }

    #[test]
    fn unregister() {
        let registry = WorkerRegistry::new();
        registry.register("w");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("w").is_some());
        assert!(registry.unregister("w").is_some());
        assert!(registry.is_empty());
    }
}
