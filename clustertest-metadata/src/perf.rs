// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Name of the per-node directory that holds performance artifacts.
///
/// Exported workload statistics are written to `<artifacts>/1.perf/stats.json`.
pub const PERF_ARTIFACTS_DIR: &str = "perf";

/// File name of exported workload statistics, one JSON object per line.
pub const PERF_STATS_FILE_NAME: &str = "stats.json";

/// One per-second snapshot of sysbench output.
///
/// Values other than `time` are kept exactly as sysbench printed them, so that dashboards see the
/// tool's own precision.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SysbenchSnapshot {
    /// Unix timestamp (in seconds) that this snapshot corresponds to.
    pub time: i64,

    /// The number of client threads.
    pub threads: String,

    /// Transactions per second.
    pub transactions: String,

    /// Queries per second.
    pub qps: String,

    /// Read queries per second.
    pub read_qps: String,

    /// Write queries per second.
    pub write_qps: String,

    /// Other (neither read nor write) queries per second.
    pub other_qps: String,

    /// 95th percentile latency, in milliseconds.
    pub p95_latency: String,

    /// Errors per second.
    pub errors: String,

    /// Reconnects per second.
    pub reconnects: String,
}
