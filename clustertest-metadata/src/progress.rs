// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// A point-in-time view of one pool-managed worker, as rendered by the progress surface.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerSummary {
    /// The worker's name.
    pub name: String,

    /// Free-form status set by the scheduler for this worker.
    pub status: String,

    /// The test currently bound to the worker, if any.
    pub test: Option<TestRunSummary>,

    /// The name of the cluster currently assigned to the worker, if any.
    pub cluster: Option<String>,
}

/// A point-in-time view of a running test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestRunSummary {
    /// The name of the test.
    pub name: String,

    /// The 1-based index of this run of the test.
    pub run_num: usize,

    /// The total number of runs scheduled for the test.
    pub run_count: usize,

    /// The main unit's status line, or `N/A`.
    pub main_status: String,

    /// The main unit's progress, as a percentage in `0..=100`.
    pub progress_percent: u8,

    /// Whether the test has recorded any failures so far.
    pub failed: bool,
}

impl TestRunSummary {
    /// Converts a progress fraction to a percentage suitable for display.
    ///
    /// Values are clamped to `[0, 1]` before conversion; non-finite values are displayed as 0.
    pub fn percent_from_fraction(frac: f64) -> u8 {
        if !frac.is_finite() {
            return 0;
        }
        (frac.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0, 0; "zero")]
    #[test_case(0.254, 25; "rounds down")]
    #[test_case(0.257, 26; "rounds up")]
    #[test_case(1.5, 100; "clamps above")]
    #[test_case(-0.5, 0; "clamps below")]
    #[test_case(f64::NAN, 0; "nan")]
    fn percent_from_fraction(frac: f64, expected: u8) {
        assert_eq!(TestRunSummary::percent_from_fraction(frac), expected);
    }
}
