// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running test bodies and helper units.
//!
//! [`run_test`] and [`TestContext::spawn_unit`] are the only places where an execution unit's
//! [`Unwind`] signal, or a panic, is recovered. Everything below them propagates `Unwind` with `?`.

use crate::{
    cancel::CancelToken,
    failure::FailureArg,
    helpers::{plural, teamcity_escape, teamcity_name_escape},
    logger::{TestLogger, shout},
    owner::Owner,
    test_state::TestState,
    unit::UnitId,
    unwind::{SkipReason, TestResult, Unwind, panic_message},
};
use chrono::{DateTime, Local};
use clustertest_metadata::{ClusterTestExitCode, TestOutcomeSummary, TestStatusSummary};
use futures::FutureExt;
use std::{
    any::Any,
    fmt,
    future::Future,
    io::{self, Write},
    panic::{AssertUnwindSafe, Location},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The handle an execution unit uses to talk to its test.
///
/// Each unit gets its own context, carrying its identity and the test's cancellation scope.
#[derive(Clone, Debug)]
pub struct TestContext {
    state: Arc<TestState>,
    unit: UnitId,
    cancel: CancelToken,
}

impl TestContext {
    /// The shared test state.
    pub fn state(&self) -> &Arc<TestState> {
        &self.state
    }

    /// This unit's identity.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The test's cancellation scope. It is cancelled on the first fatal failure.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Writes a line to the test log.
    #[track_caller]
    pub fn log(&self, line: impl fmt::Display) {
        self.state
            .logger()
            .log_line(Location::caller(), &line.to_string());
    }

    /// Sets this unit's status. An empty message clears it.
    #[track_caller]
    pub fn status(&self, message: impl fmt::Display) {
        self.state.report_status(self.unit, message);
    }

    /// Clears this unit's status.
    pub fn clear_status(&self) {
        self.state.clear_status(self.unit);
    }

    /// Sets this unit's progress.
    pub fn progress(&self, frac: f64) {
        self.state.report_progress(self.unit, frac);
    }

    /// Records a non-fatal failure.
    #[track_caller]
    pub fn error(&self, args: impl IntoIterator<Item = FailureArg>) {
        self.state.error(args);
    }

    /// Records a non-fatal failure with a templated message.
    #[track_caller]
    pub fn errorf(&self, template: &str, args: impl IntoIterator<Item = FailureArg>) {
        self.state.errorf(template, args);
    }

    /// Records a fatal failure. Propagate the result with `?`.
    #[track_caller]
    pub fn fatal(&self, args: impl IntoIterator<Item = FailureArg>) -> Unwind {
        self.state.fatal(args)
    }

    /// Records a fatal failure with a templated message. Propagate the result with `?`.
    #[track_caller]
    pub fn fatalf(&self, template: &str, args: impl IntoIterator<Item = FailureArg>) -> Unwind {
        self.state.fatalf(template, args)
    }

    /// Skips the test.
    #[track_caller]
    pub fn skip(&self, reason: impl Into<String>) -> Unwind {
        self.state.skip(reason)
    }

    /// Spawns a helper unit onto the current tokio runtime.
    ///
    /// The unit gets a fresh identity. Its status is cleared when it exits, however it exits.
    /// Panics are recorded as fatal failures of the test.
    pub fn spawn_unit<F, Fut>(&self, name: impl Into<String>, f: F) -> JoinHandle<TestResult>
    where
        F: FnOnce(TestContext) -> Fut + Send + 'static,
        Fut: Future<Output = TestResult> + Send + 'static,
    {
        let name = name.into();
        let ctx = TestContext {
            state: Arc::clone(&self.state),
            unit: self.state.new_unit(),
            cancel: self.cancel.clone(),
        };

        tokio::spawn(async move {
            let state = Arc::clone(&ctx.state);
            let unit = ctx.unit;
            debug!(test = %state.name(), %unit, unit_name = %name, "starting helper unit");

            let res = AssertUnwindSafe(async move { f(ctx).await })
                .catch_unwind()
                .await;
            let res = recover(&state, &name, res);
            state.clear_status(unit);
            res
        })
    }
}

/// Runs a test body as the main unit of `state`.
///
/// The body runs under a child of `cancel`, which the test state cancels on its first fatal
/// failure. Once the body returns (or unwinds, or panics) the scope is cancelled so that helper
/// units stop, the test is marked done, and its outcome is returned.
pub async fn run_test<F, Fut>(state: Arc<TestState>, cancel: &CancelToken, f: F) -> TestOutcome
where
    F: FnOnce(TestContext) -> Fut,
    Fut: Future<Output = TestResult>,
{
    let scope = cancel.child();
    state.set_cancel_hook({
        let scope = scope.clone();
        move || {
            scope.cancel();
        }
    });

    let ctx = TestContext {
        state: Arc::clone(&state),
        unit: state.main_unit(),
        cancel: scope.clone(),
    };
    info!(test = %state.name(), "running test");
    let res = AssertUnwindSafe(async move { f(ctx).await })
        .catch_unwind()
        .await;
    // The result is already reflected in the test state.
    _ = recover(&state, "main", res);

    scope.cancel();
    state.clear_status(state.main_unit());
    state.mark_done();

    let outcome = TestOutcome::from_state(&state);
    info!(
        test = %state.name(),
        status = ?outcome.status,
        "test finished with {} {}",
        outcome.num_failures,
        plural::failures_str(outcome.num_failures),
    );
    outcome
}

fn recover(
    state: &TestState,
    unit_name: &str,
    res: Result<TestResult, Box<dyn Any + Send>>,
) -> TestResult {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(unwind)) => {
            debug!(test = %state.name(), unit_name, "unit unwound: {unwind}");
            Err(unwind)
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            state.record_failure_and_cancel(None, [
                FailureArg::value(format_args!("{unit_name} panicked: {message}")),
            ]);
            Err(Unwind::Fatal)
        }
    }
}

/// The final status of a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestStatus {
    /// No failures were recorded.
    Passed,

    /// At least one failure was recorded.
    Failed,

    /// The test was skipped without failing.
    Skipped(SkipReason),
}

/// The outcome of a finished test.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    /// The name of the test.
    pub name: String,

    /// The final status. Failures take precedence over skips.
    pub status: TestStatus,

    /// When the test started.
    pub start_time: DateTime<Local>,

    /// How long the test ran.
    pub duration: Duration,

    /// The number of failures, including suppressed ones.
    pub num_failures: usize,

    /// Summaries of retained failures.
    pub failure_message: String,

    /// The owner failures were attributed to, if any failure carried ownership.
    pub failure_owner: Option<Owner>,
}

impl TestOutcome {
    /// Reads the outcome of a test from its state.
    pub fn from_state(state: &TestState) -> Self {
        let status = if state.failed() {
            TestStatus::Failed
        } else if let Some(skip) = state.skip_reason() {
            TestStatus::Skipped(skip)
        } else {
            TestStatus::Passed
        };

        Self {
            name: state.name().to_owned(),
            status,
            start_time: state.start_time(),
            duration: state.duration(),
            num_failures: state.num_failures(),
            failure_message: state.failure_message(),
            failure_owner: state.failure_owner().map(|err| err.owner().clone()),
        }
    }

    /// Returns true if the test failed.
    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Failed
    }

    /// Converts the outcome to its serializable form.
    pub fn to_summary(&self) -> TestOutcomeSummary {
        let status = match &self.status {
            TestStatus::Passed => TestStatusSummary::Passed,
            TestStatus::Failed => TestStatusSummary::Failed,
            TestStatus::Skipped(skip) => TestStatusSummary::Skipped {
                reason: skip.reason.clone(),
                details: skip.details.clone(),
            },
        };

        TestOutcomeSummary {
            name: self.name.clone(),
            status,
            start_time: self.start_time.fixed_offset(),
            duration_secs: self.duration.as_secs_f64(),
            num_failures: self.num_failures,
            failures: self.failure_message.lines().map(str::to_owned).collect(),
            owner: self.failure_owner.as_ref().map(|owner| owner.to_string()),
        }
    }
}

/// Writes the `--- PASS/FAIL/SKIP` line for `outcome` to `out` and the test log.
///
/// With `teamcity`, the matching TeamCity service messages are written as well.
pub fn report_outcome(
    outcome: &TestOutcome,
    logger: &dyn TestLogger,
    out: &mut dyn Write,
    teamcity: bool,
) -> io::Result<()> {
    let secs = outcome.duration.as_secs_f64();
    let tc_name = teamcity_escape(&teamcity_name_escape(&outcome.name));

    match &outcome.status {
        TestStatus::Passed => {
            shout(logger, out, format_args!("--- PASS: {} ({secs:.2}s)", outcome.name))?;
        }
        TestStatus::Failed => {
            shout(
                logger,
                out,
                format_args!(
                    "--- FAIL: {} ({secs:.2}s)\n{}",
                    outcome.name, outcome.failure_message
                ),
            )?;
            if teamcity {
                shout(
                    logger,
                    out,
                    format_args!(
                        "##teamcity[testFailed name='{tc_name}' details='{}' flowId='{tc_name}']",
                        teamcity_escape(&outcome.failure_message),
                    ),
                )?;
            }
        }
        TestStatus::Skipped(skip) => {
            shout(
                logger,
                out,
                format_args!(
                    "--- SKIP: {} ({secs:.2}s)\n\t{}",
                    outcome.name, skip.reason
                ),
            )?;
            if teamcity {
                shout(
                    logger,
                    out,
                    format_args!(
                        "##teamcity[testIgnored name='{tc_name}' message='{}' flowId='{tc_name}']",
                        teamcity_escape(&skip.reason),
                    ),
                )?;
            }
        }
    }

    if teamcity {
        shout(
            logger,
            out,
            format_args!(
                "##teamcity[testFinished name='{tc_name}' duration='{}' flowId='{tc_name}']",
                outcome.duration.as_millis()
            ),
        )?;
    }
    Ok(())
}

/// The process exit status for a run that produced `outcomes`.
pub fn run_exit_code(outcomes: &[TestOutcome]) -> i32 {
    if outcomes.is_empty() {
        ClusterTestExitCode::NO_TESTS_RUN
    } else if outcomes.iter().any(TestOutcome::is_failed) {
        ClusterTestExitCode::TEST_RUN_FAILED
    } else {
        ClusterTestExitCode::OK
    }
}
