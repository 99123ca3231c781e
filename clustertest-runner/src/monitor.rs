// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Groups of cooperating tasks that fail fast.
//!
//! A [`MonitorGroup`] runs a set of tasks under one cancellation scope, a child of the scope it is
//! created from. The first task failure the group observes cancels the scope, so every sibling
//! can stop.
//!
//! Tasks come in two kinds:
//!
//! * Foreground tasks, added with [`go`](MonitorGroup::go), are the work itself (e.g. a workload
//!   command). Once all of them have succeeded, the group cancels its scope to stop the watchers.
//! * Watchers, added with [`go_watcher`](MonitorGroup::go_watcher), run for as long as the
//!   foreground tasks do (e.g. a cluster liveness check). Errors they return after the foreground
//!   tasks have finished are ignored.
//!
//! [`MonitorGroup::wait`] always waits for every task to exit, then picks among the errors
//! collected on the way. The error of the lowest-registered task that failed for a reason other
//! than cancellation wins; failing that, the lowest-registered cancellation error. The choice does
//! not depend on the order in which tasks happen to finish.

use crate::{
    cancel::CancelToken,
    chain::{DynError, InlineErrorChain},
    errors::{BoxError, MonitorError},
    helpers::plural,
    unwind::panic_message,
};
use std::{collections::HashMap, future::Future};
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

/// A group of tasks sharing one cancellation scope.
///
/// Tasks are spawned onto the current tokio runtime as soon as they are added.
#[derive(Debug)]
pub struct MonitorGroup {
    cancel: CancelToken,
    tasks: JoinSet<Result<(), BoxError>>,
    registered: Vec<TaskInfo>,
    ids: HashMap<Id, usize>,
}

#[derive(Debug)]
struct TaskInfo {
    name: String,
    kind: TaskKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TaskKind {
    Foreground,
    Watcher,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GroupState {
    Running,
    Completed,
    Failed,
}

impl MonitorGroup {
    /// Creates a new, empty group whose scope is a child of `parent`.
    pub fn new(parent: &CancelToken) -> Self {
        Self {
            cancel: parent.child(),
            tasks: JoinSet::new(),
            registered: Vec::new(),
            ids: HashMap::new(),
        }
    }

    /// The group's cancellation scope.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Adds a foreground task.
    ///
    /// `f` is called with the group's scope. The task must return promptly once the scope is
    /// cancelled.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn go<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.spawn(name.into(), TaskKind::Foreground, f);
    }

    /// Adds a watcher that runs alongside the foreground tasks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn go_watcher<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.spawn(name.into(), TaskKind::Watcher, f);
    }

    /// Waits for every task in the group to exit.
    ///
    /// Returns the chosen failure, if any. See the module documentation for how it is chosen.
    pub async fn wait(mut self) -> Result<(), MonitorError> {
        let mut foreground_left = self
            .registered
            .iter()
            .filter(|info| info.kind == TaskKind::Foreground)
            .count();
        debug!(
            "waiting on {} monitor {}",
            self.registered.len(),
            plural::tasks_str(self.registered.len())
        );

        let mut state = GroupState::Running;
        let mut errors = Vec::new();
        if foreground_left == 0 {
            self.complete(&mut state);
        }

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (index, result) = match joined {
                Ok((id, result)) => (self.index_of(id), result.map_err(DynError::from)),
                Err(join_err) => {
                    let index = self.index_of(join_err.id());
                    let message = if join_err.is_panic() {
                        panic_message(&*join_err.into_panic())
                    } else {
                        "task was aborted".to_owned()
                    };
                    let name = self.registered[index].name.clone();
                    self.fail(
                        &mut state,
                        &mut errors,
                        MonitorError::TaskPanicked {
                            index,
                            name,
                            message,
                        },
                    );
                    continue;
                }
            };

            let info = &self.registered[index];
            match result {
                Ok(()) => {
                    debug!(task = %info.name, "monitor task finished");
                    if info.kind == TaskKind::Foreground {
                        foreground_left -= 1;
                        if foreground_left == 0 {
                            self.complete(&mut state);
                        }
                    }
                }
                Err(err) => {
                    let name = info.name.clone();
                    self.fail(
                        &mut state,
                        &mut errors,
                        MonitorError::Task { index, name, err },
                    );
                }
            }
        }

        pick_error(errors)
    }

    // ---
    // Helper methods
    // ---

    fn spawn<F, Fut>(&mut self, name: String, kind: TaskKind, f: F)
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let index = self.registered.len();
        let cancel = self.cancel.clone();
        let handle = self.tasks.spawn(async move { f(cancel).await });
        self.ids.insert(handle.id(), index);
        self.registered.push(TaskInfo { name, kind });
    }

    fn index_of(&self, id: Id) -> usize {
        // Every task in the set was registered by `spawn`.
        self.ids.get(&id).copied().unwrap_or_default()
    }

    fn complete(&self, state: &mut GroupState) {
        if *state == GroupState::Running {
            debug!("foreground tasks done, stopping watchers");
            *state = GroupState::Completed;
            self.cancel.cancel();
        }
    }

    fn fail(&self, state: &mut GroupState, errors: &mut Vec<MonitorError>, err: MonitorError) {
        match state {
            GroupState::Running => {
                if self.cancel.cancel() {
                    debug!(
                        task = %err.name(),
                        "monitor task failed, cancelling group: {}",
                        InlineErrorChain::new(&err),
                    );
                }
                *state = GroupState::Failed;
                errors.push(err);
            }
            GroupState::Failed => {
                debug!(
                    task = %err.name(),
                    "further monitor task failure: {}",
                    InlineErrorChain::new(&err),
                );
                errors.push(err);
            }
            GroupState::Completed => {
                if !err.is_cancellation() {
                    warn!(
                        "ignoring error from monitor task after completion: {}",
                        InlineErrorChain::new(&err),
                    );
                }
            }
        }
    }
}

fn pick_error(errors: Vec<MonitorError>) -> Result<(), MonitorError> {
    match errors
        .into_iter()
        .min_by_key(|err| (err.is_cancellation(), err.index()))
    {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
