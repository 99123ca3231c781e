// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The sysbench OLTP benchmarks.
//!
//! Each benchmark starts the database on every node but the last, fronts node 1 with haproxy on
//! the last (load) node, prepares the sysbench tables, and runs one sysbench workload from the
//! load node. Per-second reports from sysbench's output are exported to
//! `<artifacts>/1.perf/stats.json` for the perf dashboards.

use crate::{
    cancel::CancelToken,
    cluster::{
        Cluster, ClusterSpec, ILLEGAL_INSTRUCTION_EXIT_CODE, NodeList,
        SEGMENTATION_FAULT_EXIT_CODE, watch_nodes,
    },
    config::SysbenchDefaults,
    errors::{BoxError, ClusterError, SysbenchExportError},
    failure::FailureArg,
    harness::TestContext,
    helpers::plural,
    monitor::MonitorGroup,
    owner::Owner,
    test_state::{TestDefinition, TestState},
    unwind::TestResult,
};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use clustertest_metadata::{PERF_STATS_FILE_NAME, SysbenchSnapshot};
use regex::Regex;
use std::{
    fmt,
    panic::Location,
    sync::{Arc, LazyLock},
    time::Duration,
};
use tracing::debug;

/// The SQL user sysbench connects as.
pub const DEFAULT_USER: &str = "roach";

/// The password of [`DEFAULT_USER`].
pub const DEFAULT_PASSWORD: &str = "system";

/// The number of database nodes in a sysbench benchmark. One more node runs the load.
pub const SYSBENCH_NODES: usize = 3;

/// The number of CPUs per node in a sysbench benchmark.
pub const SYSBENCH_CPUS: usize = 32;

/// Lines of sysbench output matching this pattern are per-second reports.
pub const REPORT_LINE_PATTERN: &str = r"\[ \d+s \].*";

const REPORT_FIELD_COUNT: usize = 15;
const QPS_FIELD_COUNT: usize = 3;

static REPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REPORT_LINE_PATTERN).expect("report line pattern is valid"));

/// A built-in sysbench OLTP workload.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SysbenchWorkload {
    /// `oltp_delete`
    OltpDelete,
    /// `oltp_insert`
    OltpInsert,
    /// `oltp_point_select`
    OltpPointSelect,
    /// `oltp_update_index`
    OltpUpdateIndex,
    /// `oltp_update_non_index`
    OltpUpdateNonIndex,
    /// `oltp_read_only`
    OltpReadOnly,
    /// `oltp_read_write`
    OltpReadWrite,
    /// `oltp_write_only`
    OltpWriteOnly,
}

impl SysbenchWorkload {
    /// Every workload, in registration order.
    pub const ALL: [Self; 8] = [
        Self::OltpDelete,
        Self::OltpInsert,
        Self::OltpPointSelect,
        Self::OltpUpdateIndex,
        Self::OltpUpdateNonIndex,
        Self::OltpReadOnly,
        Self::OltpReadWrite,
        Self::OltpWriteOnly,
    ];

    /// The name sysbench knows the workload by.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OltpDelete => "oltp_delete",
            Self::OltpInsert => "oltp_insert",
            Self::OltpPointSelect => "oltp_point_select",
            Self::OltpUpdateIndex => "oltp_update_index",
            Self::OltpUpdateNonIndex => "oltp_update_non_index",
            Self::OltpReadOnly => "oltp_read_only",
            Self::OltpReadWrite => "oltp_read_write",
            Self::OltpWriteOnly => "oltp_write_only",
        }
    }
}

impl fmt::Display for SysbenchWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sysbench workload is run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SysbenchOptions {
    /// The workload to run.
    pub workload: SysbenchWorkload,

    /// How long the workload runs. Whole seconds are passed to sysbench.
    pub duration: Duration,

    /// The number of client threads.
    pub concurrency: usize,

    /// The number of tables.
    pub tables: usize,

    /// The number of rows per table.
    pub rows_per_table: usize,
}

impl SysbenchOptions {
    /// Options for `workload` with the configured defaults.
    pub fn new(workload: SysbenchWorkload, defaults: &SysbenchDefaults) -> Self {
        Self {
            workload,
            duration: defaults.duration,
            concurrency: defaults.concurrency,
            tables: defaults.tables,
            rows_per_table: defaults.rows_per_table,
        }
    }

    /// The sysbench command line, without the `prepare` or `run` subcommand.
    ///
    /// With `haproxy`, sysbench connects to the local haproxy instead of directly to node 1.
    pub fn cmd(&self, haproxy: bool) -> String {
        let (host, port) = if haproxy {
            ("127.0.0.1", "26257")
        } else {
            ("{pghost:1}", "{pgport:1}")
        };
        format!(
            "sysbench --db-driver=pgsql --pgsql-host={host} --pgsql-port={port} \
             --pgsql-user={DEFAULT_USER} --pgsql-password={DEFAULT_PASSWORD} --pgsql-db=sysbench \
             --report-interval=1 --time={} --threads={} --tables={} --table_size={} \
             --auto_inc=false {}",
            self.duration.as_secs(),
            self.concurrency,
            self.tables,
            self.rows_per_table,
            self.workload,
        )
    }
}

/// A registered sysbench benchmark.
#[derive(Clone, Debug)]
pub struct SysbenchTest {
    /// The test definition.
    pub definition: TestDefinition,

    /// The options the benchmark runs with.
    pub options: SysbenchOptions,
}

/// Returns the sysbench benchmarks, one per workload.
pub fn sysbench_tests(defaults: &SysbenchDefaults) -> Vec<SysbenchTest> {
    SysbenchWorkload::ALL
        .into_iter()
        .map(|workload| {
            let options = SysbenchOptions::new(workload, defaults);
            let name = format!(
                "sysbench/{workload}/nodes={SYSBENCH_NODES}/cpu={SYSBENCH_CPUS}/conc={}",
                options.concurrency
            );
            let cluster = ClusterSpec {
                node_count: SYSBENCH_NODES + 1,
                cpus: SYSBENCH_CPUS,
            };
            SysbenchTest {
                definition: TestDefinition::new(name, Owner::test_eng(), cluster)
                    .with_benchmark(true),
                options,
            }
        })
        .collect()
}

/// Runs a sysbench benchmark against `cluster`.
///
/// The workload runs alongside a watcher that fails the benchmark if a database node dies. A
/// sysbench crash (segfault or illegal instruction) passes the benchmark anyway.
pub async fn run_sysbench<C>(
    ctx: &TestContext,
    cluster: Arc<C>,
    options: SysbenchOptions,
    node_watch_interval: Duration,
) -> TestResult
where
    C: Cluster + 'static,
{
    let node_count = cluster.node_count();
    if node_count < 2 {
        return Err(ctx.fatalf(
            "sysbench needs a database node and a load node, but cluster {} has {} nodes",
            [
                FailureArg::value(cluster.name()),
                FailureArg::value(node_count),
            ],
        ));
    }
    let db_nodes = NodeList::range(1, node_count - 1);
    let load_node = NodeList::node(node_count);
    let cancel = ctx.cancel_token();
    let fatal = |err: ClusterError| ctx.fatal([FailureArg::error(err)]);

    ctx.status("installing cockroach");
    cluster.start(cancel, &db_nodes).await.map_err(fatal)?;
    cluster
        .wait_for_replication(cancel, 1, 3)
        .await
        .map_err(fatal)?;

    ctx.status("installing haproxy");
    cluster
        .install(cancel, &load_node, "haproxy")
        .await
        .map_err(fatal)?;
    let urls = cluster
        .pg_url(cancel, &NodeList::node(1))
        .await
        .map_err(fatal)?;
    let Some(url) = urls.first() else {
        return Err(ctx.fatal(["no connection URL returned for node 1".into()]));
    };
    cluster
        .run(cancel, &load_node, &format!("./cockroach gen haproxy --url {url}"))
        .await
        .map_err(fatal)?;
    cluster
        .run(cancel, &load_node, "haproxy -f haproxy.cfg -D")
        .await
        .map_err(fatal)?;

    ctx.status("installing sysbench");
    cluster
        .install(cancel, &load_node, "sysbench")
        .await
        .map_err(fatal)?;

    let mut group = MonitorGroup::new(cancel);
    group.go_watcher("node watcher", {
        let cluster = Arc::clone(&cluster);
        move |cancel| async move {
            watch_nodes(&*cluster, db_nodes, node_watch_interval, cancel).await
        }
    });
    group.go("sysbench", {
        let ctx = ctx.clone();
        move |cancel| async move { drive_workload(&ctx, &*cluster, &options, &cancel).await }
    });

    group
        .wait()
        .await
        .map_err(|err| ctx.fatal([FailureArg::error(err)]))
}

async fn drive_workload<C: Cluster>(
    ctx: &TestContext,
    cluster: &C,
    options: &SysbenchOptions,
    cancel: &CancelToken,
) -> Result<(), BoxError> {
    let load_node = cluster.node_count();

    ctx.status("preparing workload");
    cluster
        .run(
            cancel,
            &NodeList::node(1),
            r#"./cockroach sql --url={pgurl:1} -e "CREATE DATABASE sysbench""#,
        )
        .await?;
    cluster
        .run(
            cancel,
            &NodeList::node(load_node),
            &format!("{} prepare", options.cmd(false)),
        )
        .await?;

    ctx.status("running workload");
    let cmd = format!("{} run", options.cmd(true));
    // An estimate of when the first report was taken.
    let start = Utc::now();
    let result = cluster.run_with_details(cancel, load_node, &cmd).await?;

    match result.remote_exit_status {
        SEGMENTATION_FAULT_EXIT_CODE => {
            ctx.log("sysbench segfaulted; passing test anyway");
            return Ok(());
        }
        ILLEGAL_INSTRUCTION_EXIT_CODE => {
            ctx.log("sysbench crashed with illegal instruction; passing test anyway");
            return Ok(());
        }
        _ => {}
    }
    let result = result.into_result()?;

    ctx.status("exporting results");
    export_sysbench_results(ctx.state(), &result.stdout, start)?;
    Ok(())
}

/// Parses the per-second reports out of sysbench output.
///
/// Each report is stamped with `start` (a Unix timestamp in seconds) plus one second per report
/// before it. Lines that aren't reports are skipped, but output without any report is an error.
pub fn parse_sysbench_output(
    output: &str,
    start: i64,
) -> Result<Vec<SysbenchSnapshot>, SysbenchExportError> {
    let mut snapshots = Vec::new();

    for (index, line) in output.lines().enumerate() {
        if !REPORT_LINE.is_match(line) {
            continue;
        }
        let line_number = index + 1;

        // Drop the `[ Ns ]` prefix.
        let report = line.split_once("] ").map_or("", |(_, rest)| rest);
        let fields: Vec<_> = report.split_whitespace().collect();
        if fields.len() != REPORT_FIELD_COUNT {
            return Err(SysbenchExportError::UnexpectedFieldCount {
                line_number,
                expected: REPORT_FIELD_COUNT,
                actual: fields.len(),
            });
        }

        // Formatted as `(r/w/o: 40988.38/11147.98/5669.82)`, split across fields 6 and 7.
        let qps: Vec<_> = fields[7]
            .trim_matches(|c| c == '(' || c == ')')
            .split('/')
            .collect();
        let [read_qps, write_qps, other_qps] = qps[..] else {
            return Err(SysbenchExportError::UnexpectedQpsFieldCount {
                line_number,
                expected: QPS_FIELD_COUNT,
                actual: qps.len(),
            });
        };

        snapshots.push(SysbenchSnapshot {
            time: start + snapshots.len() as i64,
            threads: fields[1].to_owned(),
            transactions: fields[3].to_owned(),
            qps: fields[5].to_owned(),
            read_qps: read_qps.to_owned(),
            write_qps: write_qps.to_owned(),
            other_qps: other_qps.to_owned(),
            p95_latency: fields[10].to_owned(),
            errors: fields[12].to_owned(),
            reconnects: fields[14].to_owned(),
        });
    }

    if snapshots.is_empty() {
        return Err(SysbenchExportError::NoMatchingLines {
            pattern: REPORT_LINE_PATTERN,
        });
    }
    Ok(snapshots)
}

/// Parses sysbench output and writes it to `<artifacts>/1.perf/stats.json`, one JSON object per
/// line.
///
/// The metrics are aggregated across the cluster, so they are attributed to node 1. Returns the
/// path written to.
#[track_caller]
pub fn export_sysbench_results(
    state: &TestState,
    output: &str,
    start: DateTime<Utc>,
) -> Result<Utf8PathBuf, SysbenchExportError> {
    let location = Location::caller();
    let snapshots = parse_sysbench_output(output, start.timestamp())?;
    state.logger().log_line(
        location,
        &format!(
            "exported sysbench results: {} {} parsed",
            snapshots.len(),
            plural::lines_str(snapshots.len())
        ),
    );

    let mut stats = String::new();
    for snapshot in &snapshots {
        let line = serde_json::to_string(snapshot).map_err(SysbenchExportError::Serialize)?;
        stats.push_str(&line);
        stats.push('\n');
    }

    let perf_dir = state
        .artifacts_dir()
        .join(format!("1.{}", state.perf_artifacts_dir()));
    fs_err::create_dir_all(&perf_dir).map_err(|err| SysbenchExportError::Write {
        path: perf_dir.clone(),
        err,
    })?;
    let path = perf_dir.join(PERF_STATS_FILE_NAME);
    fs_err::write(&path, stats).map_err(|err| SysbenchExportError::Write {
        path: path.clone(),
        err,
    })?;
    debug!(%path, "wrote sysbench stats");

    Ok(path)
}
