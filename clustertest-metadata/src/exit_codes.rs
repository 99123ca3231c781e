// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Process exit statuses reported by a clustertest run.
///
/// A run that fails for any reason not listed here exits with status 1.
pub enum ClusterTestExitCode {}

impl ClusterTestExitCode {
    /// Every test that ran passed or was skipped.
    pub const OK: i32 = 0;

    /// No tests ran.
    pub const NO_TESTS_RUN: i32 = 4;

    /// At least one test recorded a failure.
    pub const TEST_RUN_FAILED: i32 = 100;
}
