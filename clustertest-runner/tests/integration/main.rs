// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for clustertest-runner.
//!
//! These drive whole test runs, from `run_test` down to the cluster interface, against a fake
//! cluster, and check the artifacts written to disk.

mod fake_cluster;
mod sysbench;

fn init_tracing() {
    // Multiple tests in the binary race to install the subscriber.
    _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
