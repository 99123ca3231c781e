// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The interface to the cluster a test runs against.
//!
//! Provisioning and remote command execution live outside this crate. Tests and workload drivers
//! only consume the results of the operations on [`Cluster`].

use crate::{
    cancel::CancelToken,
    errors::{BoxError, ClusterError},
};
use std::{fmt, future::Future, time::Duration};
use tracing::debug;

/// Exit status reported when a remote command was killed by `SIGSEGV`.
pub const SEGMENTATION_FAULT_EXIT_CODE: i32 = 139;

/// Exit status reported when a remote command was killed by `SIGILL`.
pub const ILLEGAL_INSTRUCTION_EXIT_CODE: i32 = 132;

/// The shape of the cluster a test needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClusterSpec {
    /// The total number of nodes, including any load-generator node.
    pub node_count: usize,

    /// The number of CPUs per node.
    pub cpus: usize,
}

/// An ordered set of 1-based node indexes.
///
/// Displayed with contiguous runs collapsed, e.g. `1-3,5`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct NodeList(Vec<usize>);

impl NodeList {
    /// Returns the nodes `first..=last`.
    pub fn range(first: usize, last: usize) -> Self {
        Self((first..=last).collect())
    }

    /// Returns the single node `node`.
    pub fn node(node: usize) -> Self {
        Self(vec![node])
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the first node, if any.
    pub fn first(&self) -> Option<usize> {
        self.0.first().copied()
    }

    /// Iterates over the nodes in order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<usize> for NodeList {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut nodes: Vec<_> = iter.into_iter().collect();
        nodes.sort_unstable();
        nodes.dedup();
        Self(nodes)
    }
}

impl fmt::Display for NodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<none>");
        }

        let mut first = true;
        let mut iter = self.0.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

/// The result of running a command on a single node.
#[derive(Clone, Debug, Default)]
pub struct RunResultDetails {
    /// The node the command ran on.
    pub node: usize,

    /// The command that was run.
    pub command: String,

    /// The exit status of the command on the remote node.
    pub remote_exit_status: i32,

    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,
}

impl RunResultDetails {
    /// Returns `self` if the command exited successfully, or a [`ClusterError::NonZeroExit`].
    pub fn into_result(self) -> Result<Self, ClusterError> {
        if self.remote_exit_status == 0 {
            Ok(self)
        } else {
            Err(ClusterError::NonZeroExit {
                command: self.command,
                nodes: NodeList::node(self.node),
                status: self.remote_exit_status,
                stderr: self.stderr,
            })
        }
    }
}

/// A cluster of nodes that commands can be run on.
///
/// Every operation takes the cancellation scope of its caller and is expected to return
/// [`ClusterError::Cancelled`] promptly once that scope is cancelled.
pub trait Cluster: Send + Sync {
    /// The name of the cluster.
    fn name(&self) -> &str;

    /// The number of nodes in the cluster.
    fn node_count(&self) -> usize;

    /// Runs `command` on every node in `nodes`. A nonzero exit on any node is an error.
    fn run(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
        command: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Runs `command` on the single node `node` and returns its output.
    ///
    /// A nonzero remote exit status is reported in the result, not as an error.
    fn run_with_details(
        &self,
        cancel: &CancelToken,
        node: usize,
        command: &str,
    ) -> impl Future<Output = Result<RunResultDetails, ClusterError>> + Send;

    /// Installs `package` on `nodes`.
    fn install(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
        package: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Starts the database service on `nodes`.
    fn start(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Returns connection URLs for `nodes`, in order.
    fn pg_url(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
    ) -> impl Future<Output = Result<Vec<String>, ClusterError>> + Send;

    /// Waits until every range is replicated at least `replicas` times, querying through `node`.
    fn wait_for_replication(
        &self,
        cancel: &CancelToken,
        node: usize,
        replicas: usize,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Returns the nodes in `nodes` whose database process is not running.
    fn dead_nodes(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
    ) -> impl Future<Output = Result<NodeList, ClusterError>> + Send;
}

/// Polls `nodes` for liveness every `interval` until `cancel` fires.
///
/// Returns [`ClusterError::NodesDied`] as soon as any node is found dead. Cancellation is a normal
/// exit for a watcher, so it returns `Ok(())` in that case.
pub async fn watch_nodes<C: Cluster>(
    cluster: &C,
    nodes: NodeList,
    interval: Duration,
    cancel: CancelToken,
) -> Result<(), BoxError> {
    debug!(cluster = cluster.name(), %nodes, ?interval, "watching nodes");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        match cluster.dead_nodes(&cancel, &nodes).await {
            Ok(dead) if dead.is_empty() => {}
            Ok(dead) => return Err(ClusterError::NodesDied { nodes: dead }.into()),
            Err(ClusterError::Cancelled(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}
