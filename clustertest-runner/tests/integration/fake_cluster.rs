// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clustertest_runner::{
    cancel::CancelToken,
    cluster::{Cluster, NodeList, RunResultDetails},
    errors::{Cancelled, ClusterError},
};
use std::sync::Mutex;

/// How the fake cluster responds to the workload command.
#[derive(Clone, Debug)]
pub enum WorkloadBehavior {
    Exit { status: i32, stdout: String },
    HangUntilCancelled,
}

/// A cluster that records the operations run against it.
#[derive(Debug)]
pub struct FakeCluster {
    node_count: usize,
    workload: WorkloadBehavior,
    dead: NodeList,
    operations: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new(node_count: usize, workload: WorkloadBehavior) -> Self {
        Self {
            node_count,
            workload,
            dead: NodeList::default(),
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dead_nodes(mut self, dead: NodeList) -> Self {
        self.dead = dead;
        self
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    fn record(&self, cancel: &CancelToken, operation: String) -> Result<(), ClusterError> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        self.operations.lock().unwrap().push(operation);
        Ok(())
    }
}

impl Cluster for FakeCluster {
    fn name(&self) -> &str {
        "fake"
    }

    fn node_count(&self) -> usize {
        self.node_count
    }

    async fn run(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
        command: &str,
    ) -> Result<(), ClusterError> {
        self.record(cancel, format!("run {nodes}: {command}"))
    }

    async fn run_with_details(
        &self,
        cancel: &CancelToken,
        node: usize,
        command: &str,
    ) -> Result<RunResultDetails, ClusterError> {
        self.record(cancel, format!("run_with_details {node}: {command}"))?;
        match &self.workload {
            WorkloadBehavior::Exit { status, stdout } => Ok(RunResultDetails {
                node,
                command: command.to_owned(),
                remote_exit_status: *status,
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            WorkloadBehavior::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(Cancelled.into())
            }
        }
    }

    async fn install(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
        package: &str,
    ) -> Result<(), ClusterError> {
        self.record(cancel, format!("install {nodes}: {package}"))
    }

    async fn start(&self, cancel: &CancelToken, nodes: &NodeList) -> Result<(), ClusterError> {
        self.record(cancel, format!("start {nodes}"))
    }

    async fn pg_url(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
    ) -> Result<Vec<String>, ClusterError> {
        self.record(cancel, format!("pg_url {nodes}"))?;
        Ok(nodes
            .iter()
            .map(|node| format!("postgres://root@n{node}:26257"))
            .collect())
    }

    async fn wait_for_replication(
        &self,
        cancel: &CancelToken,
        node: usize,
        replicas: usize,
    ) -> Result<(), ClusterError> {
        self.record(cancel, format!("wait_for_replication {node}: {replicas}x"))
    }

    async fn dead_nodes(
        &self,
        cancel: &CancelToken,
        nodes: &NodeList,
    ) -> Result<NodeList, ClusterError> {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(nodes.iter().filter(|n| self.dead.iter().any(|d| d == *n)).collect())
    }
}
