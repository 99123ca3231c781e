// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The state of a single running test.
//!
//! A [`TestState`] is created once per test run, before any test logic executes, and is shared by
//! every execution unit working on the test. It tracks per-unit status and progress, aggregates
//! failures reported from any unit, and cancels the run's scope on the first fatal failure.
//!
//! All operations are safe to call concurrently. Status lives in a [`StatusTable`] with its own
//! lock; failures, the cancellation hook, and the done and skip flags live behind a single
//! reader-writer lock. No file I/O happens while that lock is held.

use crate::{
    binary::{BinarySelector, DatabaseBinaries},
    chain::DisplayErrorChain,
    cluster::ClusterSpec,
    config::HarnessConfig,
    errors::{BuildVersionError, LoggerError},
    failure::{
        Failure, FailureArg, FailureLog, RecordedFailure, failures_find_error,
        failures_matching_error, failures_specify_owner,
    },
    helpers::DisplayRoundedSecs,
    logger::TestLogger,
    owner::{ErrorWithOwnership, Owner},
    status::{StatusRecord, StatusTable},
    stopwatch::{StopwatchSnapshot, StopwatchStart, stopwatch},
    unit::{UnitAllocator, UnitId},
    unwind::{SkipReason, Unwind},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use clustertest_metadata::PERF_ARTIFACTS_DIR;
use debug_ignore::DebugIgnore;
use std::{
    collections::BTreeMap,
    error::Error,
    fmt,
    io::Write,
    panic::Location,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc},
    thread,
    time::Duration,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// The default time to wait for a failure's detail log to be written.
pub const DEFAULT_DETAIL_LOG_TIMEOUT: Duration = Duration::from_secs(10);

/// The directory on cluster nodes that coverage data is written to, when coverage is enabled.
pub const COVERAGE_ARTIFACTS_DIR: &str = "coverage";

/// The static description of a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestDefinition {
    name: String,
    owner: Owner,
    cluster: ClusterSpec,
    benchmark: bool,
}

impl TestDefinition {
    /// Creates a new test definition.
    pub fn new(name: impl Into<String>, owner: Owner, cluster: ClusterSpec) -> Self {
        Self {
            name: name.into(),
            owner,
            cluster,
            benchmark: false,
        }
    }

    /// Marks the test as a benchmark. Benchmarks always run the standard binary.
    pub fn with_benchmark(mut self, benchmark: bool) -> Self {
        self.benchmark = benchmark;
        self
    }

    /// The name of the test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The team that owns the test.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The cluster the test needs.
    pub fn cluster(&self) -> ClusterSpec {
        self.cluster
    }

    /// Whether the test is a benchmark.
    pub fn is_benchmark(&self) -> bool {
        self.benchmark
    }
}

/// Builds a [`TestState`].
#[derive(Debug)]
pub struct TestStateBuilder {
    definition: TestDefinition,
    logger: Arc<dyn TestLogger>,
    artifacts_dir: Utf8PathBuf,
    binaries: Option<DatabaseBinaries>,
    build_version: Option<semver::Version>,
    detail_log_timeout: Duration,
    assertions_probability: f64,
    versions_binary_override: BTreeMap<String, Utf8PathBuf>,
    debug: bool,
    skip_init: bool,
    coverage: bool,
}

impl TestStateBuilder {
    /// Creates a new builder for a test writing to `logger`, with artifacts in `artifacts_dir`.
    pub fn new(
        definition: TestDefinition,
        logger: Arc<dyn TestLogger>,
        artifacts_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            definition,
            logger,
            artifacts_dir: artifacts_dir.into(),
            binaries: None,
            build_version: None,
            detail_log_timeout: DEFAULT_DETAIL_LOG_TIMEOUT,
            assertions_probability: 0.0,
            versions_binary_override: BTreeMap::new(),
            debug: false,
            skip_init: false,
            coverage: false,
        }
    }

    /// Applies the harness-wide settings from `config`.
    pub fn apply_config(mut self, config: &HarnessConfig) -> Self {
        self.detail_log_timeout = config.detail_log_timeout();
        self.assertions_probability = config.runtime_assertions_probability();
        self
    }

    /// Sets the binaries the test can run.
    pub fn binaries(mut self, binaries: DatabaseBinaries) -> Self {
        self.binaries = Some(binaries);
        self
    }

    /// Sets the version of the binaries under test.
    pub fn build_version(mut self, version: semver::Version) -> Self {
        self.build_version = Some(version);
        self
    }

    /// Sets how long failure reporting waits for a detail log to be written.
    pub fn detail_log_timeout(mut self, timeout: Duration) -> Self {
        self.detail_log_timeout = timeout;
        self
    }

    /// Sets binaries to use in place of released ones, keyed by version (e.g. `23.1.4`).
    pub fn versions_binary_override(
        mut self,
        overrides: impl IntoIterator<Item = (String, Utf8PathBuf)>,
    ) -> Self {
        self.versions_binary_override = overrides.into_iter().collect();
        self
    }

    /// Runs the test in debug mode: the cluster is left running after a failure.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Skips cluster initialization when nodes are started.
    pub fn skip_init(mut self, skip_init: bool) -> Self {
        self.skip_init = skip_init;
        self
    }

    /// Enables coverage collection on cluster nodes.
    pub fn coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    /// Builds the test state. The main unit is allocated here.
    pub fn build(self) -> TestState {
        let units = UnitAllocator::new();
        let main_unit = units.allocate();
        let binaries = self.binaries.map(|binaries| {
            BinarySelector::new(
                binaries,
                self.definition.is_benchmark(),
                self.assertions_probability,
            )
        });

        TestState {
            definition: self.definition,
            main_unit,
            units,
            logger: self.logger,
            artifacts_dir: self.artifacts_dir,
            binaries,
            build_version: self.build_version,
            versions_binary_override: self.versions_binary_override,
            debug: self.debug,
            skip_init: self.skip_init,
            coverage: self.coverage,
            detail_log_timeout: self.detail_log_timeout,
            stopwatch: stopwatch(),
            status: StatusTable::new(),
            inner: RwLock::new(TestStateInner {
                failures: FailureLog::new(),
                cancel: CancelState::Unarmed,
                done: None,
                skip: None,
            }),
        }
    }
}

/// The state of a single running test, shared by all of its execution units.
#[derive(Debug)]
pub struct TestState {
    definition: TestDefinition,
    main_unit: UnitId,
    units: UnitAllocator,
    logger: Arc<dyn TestLogger>,
    artifacts_dir: Utf8PathBuf,
    binaries: Option<BinarySelector>,
    build_version: Option<semver::Version>,
    versions_binary_override: BTreeMap<String, Utf8PathBuf>,
    debug: bool,
    skip_init: bool,
    coverage: bool,
    detail_log_timeout: Duration,
    stopwatch: StopwatchStart,
    status: StatusTable,
    inner: RwLock<TestStateInner>,
}

#[derive(Debug)]
struct TestStateInner {
    failures: FailureLog,
    cancel: CancelState,
    done: Option<StopwatchSnapshot>,
    skip: Option<SkipReason>,
}

type CancelHook = DebugIgnore<Box<dyn FnOnce() + Send + Sync>>;

/// Transitions are first-writer-wins under the write lock: the hook is taken out exactly once.
#[derive(Debug)]
enum CancelState {
    Unarmed,
    Armed(CancelHook),
    Fired,
    FiredBeforeArmed,
}

impl TestState {
    // ---
    // Identity and metadata
    // ---

    /// The test's definition.
    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    /// The name of the test.
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// The main execution unit, which runs the test body.
    pub fn main_unit(&self) -> UnitId {
        self.main_unit
    }

    /// Allocates an identity for a new helper unit.
    pub fn new_unit(&self) -> UnitId {
        self.units.allocate()
    }

    /// The test's logger.
    pub fn logger(&self) -> &Arc<dyn TestLogger> {
        &self.logger
    }

    /// The directory holding this test's artifacts.
    pub fn artifacts_dir(&self) -> &Utf8Path {
        &self.artifacts_dir
    }

    /// The directory on cluster nodes that perf artifacts are written to.
    pub fn perf_artifacts_dir(&self) -> &'static str {
        PERF_ARTIFACTS_DIR
    }

    /// The version of the binaries under test, if known.
    pub fn build_version(&self) -> Option<&semver::Version> {
        self.build_version.as_ref()
    }

    /// Returns true if the build version is at least `min`.
    ///
    /// `min` may have a leading `v`, and must not have a prerelease component. Prereleases of `min`
    /// itself compare as at least `min`: `2.1.0-alpha.1` satisfies a minimum of `2.1.0`.
    pub fn is_build_version(&self, min: &str) -> Result<bool, BuildVersionError> {
        let trimmed = min.strip_prefix('v').unwrap_or(min);
        let parse = |input: &str| {
            semver::Version::parse(input).map_err(|err| BuildVersionError::Parse {
                input: min.to_owned(),
                err,
            })
        };

        let parsed = parse(trimmed)?;
        if !parsed.pre.is_empty() {
            return Err(BuildVersionError::Prerelease {
                input: min.to_owned(),
                prerelease: parsed.pre.to_string(),
            });
        }
        // The "-0" suffix makes every prerelease of `min` compare greater than or equal to it.
        let min_version = parse(&format!("{trimmed}-0"))?;
        let build = self.build_version.as_ref().ok_or(BuildVersionError::Unknown)?;
        Ok(*build >= min_version)
    }

    /// Returns the binary this test should run, if binaries were provided.
    ///
    /// The choice is made on the first call and reused afterwards, and is written to the test log.
    #[track_caller]
    pub fn binary(&self) -> Option<&Utf8Path> {
        let binaries = self.binaries.as_ref()?;
        Some(binaries.select(self.logger.as_ref()))
    }

    /// Binaries to use in place of released ones, keyed by version.
    pub fn versions_binary_override(&self) -> &BTreeMap<String, Utf8PathBuf> {
        &self.versions_binary_override
    }

    /// The override binary for `version`, if there is one. A leading `v` is ignored.
    pub fn binary_override_for(&self, version: &str) -> Option<&Utf8Path> {
        let version = version.strip_prefix('v').unwrap_or(version);
        self.versions_binary_override
            .get(version)
            .map(Utf8PathBuf::as_path)
    }

    /// Returns true if the test runs in debug mode.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Returns true if cluster initialization should be skipped.
    pub fn skip_init(&self) -> bool {
        self.skip_init
    }

    /// The directory on cluster nodes that coverage data goes to, if coverage is enabled.
    pub fn coverage_artifacts_dir(&self) -> Option<&'static str> {
        self.coverage.then_some(COVERAGE_ARTIFACTS_DIR)
    }

    /// The binaries available to this test, if any were provided.
    pub fn binaries(&self) -> Option<&DatabaseBinaries> {
        self.binaries.as_ref().map(BinarySelector::binaries)
    }

    // ---
    // Status and progress
    // ---

    /// Sets the status message of `unit`. An empty message clears the unit's status.
    ///
    /// Progress previously reported by the unit is kept.
    #[track_caller]
    pub fn report_status(&self, unit: UnitId, message: impl fmt::Display) {
        let message = message.to_string();
        if message.is_empty() {
            self.status.clear(unit);
            return;
        }

        self.status.set(unit, message.clone());
        if !self.logger.is_closed() {
            let prefix = if unit == self.main_unit {
                "test status"
            } else {
                "test worker status"
            };
            self.logger
                .log_line(Location::caller(), &format!("{prefix}: {message}"));
        }
    }

    /// Clears the status of `unit`, marking it idle.
    pub fn clear_status(&self, unit: UnitId) {
        self.status.clear(unit);
    }

    /// Sets the progress of `unit`. `frac` is stored as is; it is not clamped.
    pub fn report_progress(&self, unit: UnitId, frac: f64) {
        self.status.set_progress(unit, frac);
    }

    /// Returns the status record of `unit`, or `None` if it is idle or unknown.
    pub fn status_of(&self, unit: UnitId) -> Option<StatusRecord> {
        self.status.get(unit)
    }

    /// Returns every unit's status record, ordered by unit.
    pub fn statuses(&self) -> Vec<(UnitId, StatusRecord)> {
        self.status.snapshot()
    }

    /// Renders the main unit's status as `<message> (set <age> ago)`, or `N/A`.
    pub fn main_status(&self) -> String {
        match self.status.get(self.main_unit) {
            Some(record) => format!(
                "{} (set {} ago)",
                record.message(),
                DisplayRoundedSecs(record.age())
            ),
            None => "N/A".to_owned(),
        }
    }

    /// The main unit's progress, or 0 if it hasn't reported any.
    pub fn main_progress(&self) -> f64 {
        self.status
            .get(self.main_unit)
            .map_or(0.0, |record| record.progress())
    }

    // ---
    // Failure reporting
    // ---

    /// Records a failure reported by test code.
    ///
    /// With no template, the message is the space-joined rendering of `args`; otherwise `{}`
    /// placeholders in `template` are filled from `args` in order. Error arguments are also kept
    /// as structured components of the failure.
    ///
    /// The failure is always counted and written to its own detail log. Unless suppression is
    /// active, it is also retained and summarized in the main log.
    #[track_caller]
    pub fn record_failure(
        &self,
        template: Option<&str>,
        args: impl IntoIterator<Item = FailureArg>,
    ) -> RecordedFailure {
        self.record_failure_at(Location::caller(), template, args)
    }

    /// Records a failure, then invokes the cancellation hook.
    #[track_caller]
    pub fn record_failure_and_cancel(
        &self,
        template: Option<&str>,
        args: impl IntoIterator<Item = FailureArg>,
    ) -> RecordedFailure {
        let recorded = self.record_failure_at(Location::caller(), template, args);
        self.cancel();
        recorded
    }

    /// Records a non-fatal failure. The test keeps running.
    #[track_caller]
    pub fn error(&self, args: impl IntoIterator<Item = FailureArg>) {
        self.record_failure_at(Location::caller(), None, args);
    }

    /// Records a non-fatal failure with a templated message.
    #[track_caller]
    pub fn errorf(&self, template: &str, args: impl IntoIterator<Item = FailureArg>) {
        self.record_failure_at(Location::caller(), Some(template), args);
    }

    /// Records a fatal failure and cancels the test.
    ///
    /// The returned [`Unwind`] must be propagated to the top of the calling unit.
    #[track_caller]
    pub fn fatal(&self, args: impl IntoIterator<Item = FailureArg>) -> Unwind {
        self.record_failure_and_cancel(None, args);
        Unwind::Fatal
    }

    /// Records a fatal failure with a templated message and cancels the test.
    #[track_caller]
    pub fn fatalf(&self, template: &str, args: impl IntoIterator<Item = FailureArg>) -> Unwind {
        self.record_failure_and_cancel(Some(template), args);
        Unwind::Fatal
    }

    /// Fails the test immediately, without a more specific message.
    #[track_caller]
    pub fn fail_now(&self) -> Unwind {
        self.fatal(["FailNow called".into()])
    }

    /// Skips the test. Skips are not failures.
    #[track_caller]
    pub fn skip(&self, reason: impl Into<String>) -> Unwind {
        self.skip_with_details(reason, String::new())
    }

    /// Skips the test, with additional details.
    #[track_caller]
    pub fn skip_with_details(
        &self,
        reason: impl Into<String>,
        details: impl Into<String>,
    ) -> Unwind {
        let skip = SkipReason {
            reason: reason.into(),
            details: details.into(),
        };
        self.logger
            .log_line(Location::caller(), &format!("test skipped: {}", skip.reason));
        self.write().skip = Some(skip);
        Unwind::Skip
    }

    /// Stops retaining new failures.
    ///
    /// Later failures are still counted and still written to their detail logs, but they no longer
    /// appear in [`failures`](Self::failures), [`failure_message`](Self::failure_message), or the
    /// main log. Used once the root cause of a test failure is known, to avoid noise from
    /// secondary failures such as timeouts.
    pub fn suppress_failures(&self) {
        self.write().failures.suppress();
    }

    /// Clears retained failures, resets the failure count, and stops suppressing.
    pub fn reset_failures(&self) {
        self.write().failures.reset();
    }

    /// Returns true if any failure has been recorded since the last reset.
    pub fn failed(&self) -> bool {
        self.read().failures.failed()
    }

    /// The number of failures recorded since the last reset, including suppressed ones.
    pub fn num_failures(&self) -> usize {
        self.read().failures.num_failures()
    }

    /// The summaries of all retained failures, one per line.
    pub fn failure_message(&self) -> String {
        self.read().failures.failure_message()
    }

    /// A copy of all retained failures, in recording order.
    pub fn failures(&self) -> Vec<Failure> {
        self.read().failures.failures().to_vec()
    }

    /// The in-memory output buffer of failure summaries.
    pub fn output(&self) -> String {
        self.read().failures.output().to_owned()
    }

    /// Returns true if any retained failure contains an error of kind `K`.
    pub fn matches_error<K: Error + 'static>(&self) -> bool {
        failures_matching_error::<K>(self.read().failures.failures())
    }

    /// Returns a copy of the innermost error of kind `K` in the first retained failure containing
    /// one.
    pub fn find_error<K: Error + Clone + 'static>(&self) -> Option<K> {
        failures_find_error::<K>(self.read().failures.failures()).cloned()
    }

    /// Returns the first ownership metadata found in retained failures.
    pub fn failure_owner(&self) -> Option<ErrorWithOwnership> {
        failures_specify_owner(self.read().failures.failures()).cloned()
    }

    /// The skip reason, if the test was skipped.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.read().skip.clone()
    }

    // ---
    // Cancellation
    // ---

    /// Registers the hook called on the first fatal failure.
    ///
    /// If a fatal failure has already happened, the hook is called immediately.
    pub fn set_cancel_hook(&self, hook: impl FnOnce() + Send + Sync + 'static) {
        let hook: Box<dyn FnOnce() + Send + Sync> = Box::new(hook);
        let run_now = {
            let mut inner = self.write();
            match inner.cancel {
                CancelState::Unarmed | CancelState::Armed(_) => {
                    inner.cancel = CancelState::Armed(DebugIgnore(hook));
                    None
                }
                CancelState::Fired | CancelState::FiredBeforeArmed => {
                    inner.cancel = CancelState::Fired;
                    Some(hook)
                }
            }
        };

        if let Some(hook) = run_now {
            debug!(test = %self.name(), "test already cancelled, invoking hook on registration");
            hook();
        }
    }

    /// Returns true once a fatal failure has cancelled the test.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.read().cancel,
            CancelState::Fired | CancelState::FiredBeforeArmed
        )
    }

    fn cancel(&self) {
        let hook = {
            let mut inner = self.write();
            match std::mem::replace(&mut inner.cancel, CancelState::Fired) {
                CancelState::Armed(hook) => Some(hook),
                CancelState::Unarmed => {
                    inner.cancel = CancelState::FiredBeforeArmed;
                    None
                }
                state @ (CancelState::Fired | CancelState::FiredBeforeArmed) => {
                    inner.cancel = state;
                    None
                }
            }
        };

        // The hook runs outside the lock: it typically wakes units that report failures of their
        // own.
        if let Some(hook) = hook {
            debug!(test = %self.name(), "cancelling test");
            (hook.0)();
        }
    }

    // ---
    // Lifecycle
    // ---

    /// When the test started.
    pub fn start_time(&self) -> DateTime<Local> {
        self.stopwatch.start_time()
    }

    /// Marks the test as done. Only the first call has an effect.
    pub fn mark_done(&self) {
        let mut inner = self.write();
        if inner.done.is_none() {
            inner.done = Some(self.stopwatch.snapshot());
        }
    }

    /// Returns true once the test has been marked done.
    pub fn is_done(&self) -> bool {
        self.read().done.is_some()
    }

    /// When the test was marked done.
    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.read().done.map(|snapshot| snapshot.end_time())
    }

    /// How long the test ran, or has been running if it isn't done yet.
    pub fn duration(&self) -> Duration {
        match self.read().done {
            Some(snapshot) => snapshot.duration,
            None => self.stopwatch.snapshot().duration,
        }
    }

    // ---
    // Helper methods
    // ---

    pub(crate) fn record_failure_at(
        &self,
        location: &'static Location<'static>,
        template: Option<&str>,
        args: impl IntoIterator<Item = FailureArg>,
    ) -> RecordedFailure {
        let failure = Failure::new(location, template, args);
        let detailed = failure.detailed();

        let (recorded, done) = {
            let mut inner = self.write();
            let recorded = inner.failures.record(failure);
            (recorded, inner.done.is_some())
        };

        if done {
            warn!(
                test = %self.name(),
                "failure reported after test finished: {}", recorded.summary,
            );
        }

        let artifact = recorded.artifact_name();
        if recorded.retained {
            self.logger.log_line(
                location,
                &format!(
                    "test failure #{}: full stack retained in {artifact}.log: {}",
                    recorded.seq, recorded.summary
                ),
            );
        } else {
            debug!(test = %self.name(), seq = recorded.seq, "suppressed failure: {}", recorded.summary);
        }

        self.write_detail_log(artifact, detailed);
        recorded
    }

    /// Writes the detail log on a separate thread, waiting at most `detail_log_timeout` for it.
    ///
    /// On a multi-threaded tokio runtime the wait goes through `block_in_place`, so other tasks
    /// keep running on the remaining workers. A current-thread runtime is blocked for the wait.
    fn write_detail_log(&self, name: String, detailed: String) {
        let logger = Arc::clone(&self.logger);
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("clustertest-{name}"))
            .spawn({
                let name = name.clone();
                move || {
                    let res = logger.child_writer(&name).and_then(|mut writer| {
                        writer
                            .write_all(detailed.as_bytes())
                            .and_then(|()| writer.flush())
                            .map_err(|err| LoggerError::Write { name, err })
                    });
                    // The receiver is gone if it stopped waiting.
                    _ = tx.send(res);
                }
            });
        if let Err(err) = spawned {
            warn!("failed to spawn writer for {name}.log, skipping it: {err}");
            return;
        }

        let wait = || rx.recv_timeout(self.detail_log_timeout);
        let received = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(wait)
            }
            _ => wait(),
        };

        match received {
            Ok(Ok(())) => {}
            Ok(Err(LoggerError::Closed)) => {
                debug!("logger closed, not writing {name}.log");
            }
            Ok(Err(err)) => {
                warn!(
                    "failed to write {name}.log: {}",
                    DisplayErrorChain::new(&err)
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "timed out after {} writing {name}.log, skipping it",
                    DisplayRoundedSecs(self.detail_log_timeout)
                );
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("writer for {name}.log exited without reporting a result");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TestStateInner> {
        // Nothing that can panic runs while the lock is held.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TestStateInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
