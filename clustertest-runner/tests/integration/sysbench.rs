// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    fake_cluster::{FakeCluster, WorkloadBehavior},
    init_tracing,
};
use camino_tempfile::Utf8TempDir;
use clustertest_metadata::SysbenchSnapshot;
use clustertest_runner::{
    cancel::CancelToken,
    cluster::NodeList,
    config::HarnessConfig,
    errors::ClusterError,
    harness::{TestOutcome, TestStatus, report_outcome, run_test},
    logger::FileLogger,
    test_state::{TestState, TestStateBuilder},
    workload::sysbench::{SysbenchTest, run_sysbench, sysbench_tests},
};
use color_eyre::eyre::{Context, Result};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{sync::Arc, time::Duration};

const OUTPUT: &str = indoc! {"
    Threads started!

    [ 1s ] thds: 256 tps: 2696.16 qps: 57806.17 (r/w/o: 40988.38/11147.98/5669.82) lat (ms,95%): 196.89 err/s: 21.96 reconn/s: 0.00
    [ 2s ] thds: 256 tps: 2788.03 qps: 55967.55 (r/w/o: 39196.41/11195.08/5576.06) lat (ms,95%): 179.94 err/s: 0.00 reconn/s: 0.00
    [ 3s ] thds: 256 tps: 2801.97 qps: 56012.40 (r/w/o: 39218.58/11196.88/5596.94) lat (ms,95%): 176.73 err/s: 0.00 reconn/s: 0.00
"};

struct Run {
    _dir: Utf8TempDir,
    config: HarnessConfig,
    test: SysbenchTest,
    state: Arc<TestState>,
    logger: Arc<FileLogger>,
}

impl Run {
    fn new() -> Result<Self> {
        init_tracing();
        let dir = Utf8TempDir::new().wrap_err("failed to create temp dir")?;
        let config = HarnessConfig::from_sources(dir.path(), None)?;
        let test = sysbench_tests(config.sysbench())
            .into_iter()
            .find(|test| test.definition.name().contains("oltp_read_write"))
            .expect("oltp_read_write is registered");

        let artifacts_dir = config.artifacts_dir().join("oltp_read_write");
        let logger = Arc::new(FileLogger::create(&artifacts_dir)?);
        let state = TestStateBuilder::new(test.definition.clone(), logger.clone(), artifacts_dir)
            .apply_config(&config)
            .build();

        Ok(Self {
            _dir: dir,
            config,
            test,
            state: Arc::new(state),
            logger,
        })
    }

    async fn run(&self, cluster: Arc<FakeCluster>, watch_interval: Duration) -> TestOutcome {
        let options = self.test.options;
        let outcome = run_test(self.state.clone(), &CancelToken::new(), |ctx| async move {
            run_sysbench(&ctx, cluster, options, watch_interval).await
        })
        .await;
        self.logger.close().expect("closed test log");
        outcome
    }

    fn test_log(&self) -> Result<String> {
        Ok(fs_err::read_to_string(self.logger.path())?)
    }
}

#[tokio::test]
async fn sysbench_exports_stats() -> Result<()> {
    let run = Run::new()?;
    let cluster = Arc::new(FakeCluster::new(
        4,
        WorkloadBehavior::Exit {
            status: 0,
            stdout: OUTPUT.to_owned(),
        },
    ));

    let interval = run.config.node_watch_interval();
    let outcome = run.run(cluster.clone(), interval).await;
    assert_eq!(outcome.status, TestStatus::Passed, "{}", outcome.failure_message);

    let ops = cluster.operations();
    let cmd = &run.test.options;
    assert_eq!(
        ops,
        [
            "start 1-3".to_owned(),
            "wait_for_replication 1: 3x".to_owned(),
            "install 4: haproxy".to_owned(),
            "pg_url 1".to_owned(),
            "run 4: ./cockroach gen haproxy --url postgres://root@n1:26257".to_owned(),
            "run 4: haproxy -f haproxy.cfg -D".to_owned(),
            "install 4: sysbench".to_owned(),
            r#"run 1: ./cockroach sql --url={pgurl:1} -e "CREATE DATABASE sysbench""#.to_owned(),
            format!("run 4: {} prepare", cmd.cmd(false)),
            format!("run_with_details 4: {} run", cmd.cmd(true)),
        ]
    );

    let stats_path = run
        .config
        .artifacts_dir()
        .join("oltp_read_write/1.perf/stats.json");
    let stats = fs_err::read_to_string(&stats_path)?;
    let snapshots: Vec<SysbenchSnapshot> = stats
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[2].time - snapshots[0].time, 2);
    assert_eq!(snapshots[1].write_qps, "11195.08");

    let log = run.test_log()?;
    for status in [
        "installing cockroach",
        "installing haproxy",
        "installing sysbench",
        "preparing workload",
        "running workload",
        "exporting results",
    ] {
        assert!(
            log.contains(&format!("test status: {status}")),
            "status {status:?} missing from log:\n{log}"
        );
    }
    assert!(log.contains("exported sysbench results: 3 lines parsed"));
    Ok(())
}

#[tokio::test]
async fn sysbench_crash_passes() -> Result<()> {
    let run = Run::new()?;
    let cluster = Arc::new(FakeCluster::new(
        4,
        WorkloadBehavior::Exit {
            status: 139,
            stdout: String::new(),
        },
    ));

    let outcome = run.run(cluster, Duration::from_secs(5)).await;
    assert_eq!(outcome.status, TestStatus::Passed);
    assert!(
        !run.state.artifacts_dir().join("1.perf").exists(),
        "no stats are exported"
    );
    assert!(
        run.test_log()?
            .contains("sysbench segfaulted; passing test anyway")
    );
    Ok(())
}

#[tokio::test]
async fn sysbench_failure_is_fatal() -> Result<()> {
    let run = Run::new()?;
    let cluster = Arc::new(FakeCluster::new(
        4,
        WorkloadBehavior::Exit {
            status: 1,
            stdout: String::new(),
        },
    ));

    let outcome = run.run(cluster, Duration::from_secs(5)).await;
    assert_eq!(outcome.status, TestStatus::Failed);
    assert_eq!(outcome.num_failures, 1);
    assert!(run.state.matches_error::<ClusterError>());
    assert!(
        outcome.failure_message.contains("exited with status 1"),
        "failure message: {}",
        outcome.failure_message
    );

    let detail = fs_err::read_to_string(run.state.artifacts_dir().join("failure_1.log"))?;
    assert!(detail.contains("error component 1: monitor task `sysbench` failed"));
    assert!(detail.contains("stack backtrace:"));

    let log = run.test_log()?;
    assert!(log.contains("test failure #1: full stack retained in failure_1.log: "));

    let mut out = Vec::new();
    report_outcome(&outcome, run.logger.as_ref(), &mut out, false)?;
    assert!(String::from_utf8(out)?.starts_with("--- FAIL: sysbench/oltp_read_write/"));
    Ok(())
}

#[tokio::test]
async fn dead_node_stops_workload() -> Result<()> {
    let run = Run::new()?;
    let cluster = Arc::new(
        FakeCluster::new(4, WorkloadBehavior::HangUntilCancelled)
            .with_dead_nodes(NodeList::node(2)),
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        run.run(cluster, Duration::from_millis(10)),
    )
    .await
    .wrap_err("workload did not stop after a node died")?;

    assert_eq!(outcome.status, TestStatus::Failed);
    assert!(
        outcome.failure_message.contains("nodes died: 2"),
        "failure message: {}",
        outcome.failure_message
    );
    assert!(run.state.is_cancelled());
    Ok(())
}
