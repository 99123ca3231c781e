// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// The final status of a test run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TestStatusSummary {
    /// The test completed without recording any failures.
    Passed,

    /// The test recorded at least one failure.
    Failed,

    /// The test was skipped.
    Skipped {
        /// The main reason the test was skipped.
        reason: String,

        /// Additional details, possibly empty.
        details: String,
    },
}

/// A serializable summary of a finished test, for downstream issue-posting tools.
///
/// Only the one-line failure summaries are included here; fully-detailed renderings live in the
/// numbered `failure_<n>.log` artifacts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestOutcomeSummary {
    /// The name of the test.
    pub name: String,

    /// The final status.
    pub status: TestStatusSummary,

    /// When the test started.
    pub start_time: DateTime<FixedOffset>,

    /// How long the test ran for, in seconds.
    pub duration_secs: f64,

    /// The total number of failures reported, including suppressed ones.
    pub num_failures: usize,

    /// One-line summaries of retained failures, in report order.
    pub failures: Vec<String>,

    /// The owner that failures were attributed to, if any failure carried ownership.
    pub owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn summary(status: TestStatusSummary) -> TestOutcomeSummary {
        TestOutcomeSummary {
            name: "sysbench/oltp_read_only/nodes=3/cpu=32/conc=256".to_owned(),
            status,
            start_time: DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00")
                .expect("valid timestamp"),
            duration_secs: 601.25,
            num_failures: 1,
            failures: vec!["(sysbench.rs:42): nodes died: 2".to_owned()],
            owner: Some("test-eng".to_owned()),
        }
    }

    #[test_case(TestStatusSummary::Passed; "passed")]
    #[test_case(TestStatusSummary::Failed; "failed")]
    #[test_case(TestStatusSummary::Skipped {
        reason: "unsupported".to_owned(),
        details: "needs 5 nodes".to_owned(),
    }; "skipped")]
    fn outcome_round_trips(status: TestStatusSummary) {
        let summary = summary(status);
        let json = serde_json::to_string(&summary).expect("serialization succeeds");
        let parsed: TestOutcomeSummary =
            serde_json::from_str(&json).expect("deserialization succeeds");
        assert_eq!(parsed, summary);
    }

    #[test]
    fn serialized_field_names() {
        let value = serde_json::to_value(summary(TestStatusSummary::Skipped {
            reason: "unsupported".to_owned(),
            details: String::new(),
        }))
        .expect("serialization succeeds");

        assert_eq!(value["duration-secs"], 601.25);
        assert_eq!(value["num-failures"], 1);
        assert_eq!(value["status"]["kind"], "skipped");
        assert_eq!(value["status"]["reason"], "unsupported");
    }
}
