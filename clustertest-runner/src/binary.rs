// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Choosing which database binary a test runs.
//!
//! Every build produces a standard binary and, usually, one compiled with runtime assertions. A
//! test that doesn't care which one it gets is given a random choice, made once per test run so
//! that every node in the cluster runs the same binary.

use crate::logger::TestLogger;
use camino::{Utf8Path, Utf8PathBuf};
use std::{panic::Location, sync::OnceLock};
use tracing::debug;

/// If set to a non-empty value, the runtime-assertions binary is always chosen.
///
/// The value is the seed the assertions build uses for its randomized constants, so setting it
/// usually means a failure is being reproduced.
pub const ASSERTIONS_SEED_ENV: &str = "CLUSTERTEST_ASSERTIONS_SEED";

/// Paths to the binaries available to a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DatabaseBinaries {
    standard: Utf8PathBuf,
    runtime_assertions: Option<Utf8PathBuf>,
}

impl DatabaseBinaries {
    /// Creates a new set with only a standard binary.
    pub fn new(standard: impl Into<Utf8PathBuf>) -> Self {
        Self {
            standard: standard.into(),
            runtime_assertions: None,
        }
    }

    /// Adds a binary built with runtime assertions.
    pub fn with_runtime_assertions(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.runtime_assertions = Some(path.into());
        self
    }

    /// The standard binary.
    pub fn standard(&self) -> &Utf8Path {
        &self.standard
    }

    /// The runtime-assertions binary, if one was provided.
    pub fn runtime_assertions(&self) -> Option<&Utf8Path> {
        self.runtime_assertions.as_deref()
    }
}

/// Picks a binary for a test and remembers the choice.
#[derive(Debug)]
pub struct BinarySelector {
    binaries: DatabaseBinaries,
    benchmark: bool,
    assertions_probability: f64,
    chosen: OnceLock<Utf8PathBuf>,
}

impl BinarySelector {
    /// Creates a new selector.
    ///
    /// Benchmarks always get the standard binary. Other tests get the runtime-assertions binary
    /// with probability `assertions_probability`, or always if [`ASSERTIONS_SEED_ENV`] is set.
    pub fn new(binaries: DatabaseBinaries, benchmark: bool, assertions_probability: f64) -> Self {
        Self {
            binaries,
            benchmark,
            assertions_probability,
            chosen: OnceLock::new(),
        }
    }

    /// The binaries being chosen from.
    pub fn binaries(&self) -> &DatabaseBinaries {
        &self.binaries
    }

    /// Returns the binary for this test. The first call makes the choice; later calls return it.
    ///
    /// The choice is written to `logger`.
    #[track_caller]
    pub fn select(&self, logger: &dyn TestLogger) -> &Utf8Path {
        self.select_with(
            logger,
            || std::env::var_os(ASSERTIONS_SEED_ENV).is_some_and(|seed| !seed.is_empty()),
            rand::random::<f64>,
        )
    }

    #[track_caller]
    pub(crate) fn select_with(
        &self,
        logger: &dyn TestLogger,
        seed_set: impl FnOnce() -> bool,
        roll: impl FnOnce() -> f64,
    ) -> &Utf8Path {
        let location = Location::caller();
        if self.benchmark {
            logger.log_line(location, "benchmark test, running with standard binary");
            return self.binaries.standard();
        }

        self.chosen.get_or_init(|| {
            let probability = if seed_set() {
                1.0
            } else {
                self.assertions_probability
            };

            if roll() < probability {
                match self.binaries.runtime_assertions() {
                    Some(path) => {
                        logger.log_line(location, "runtime assertions enabled");
                        debug!(binary = %path, "selected runtime-assertions binary");
                        return path.to_owned();
                    }
                    None => logger.log_line(
                        location,
                        "running without runtime assertions since the corresponding binary was \
                         not specified",
                    ),
                }
            }
            logger.log_line(location, "runtime assertions disabled");
            debug!(binary = %self.binaries.standard(), "selected standard binary");
            self.binaries.standard().to_owned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use test_case::test_case;

    fn binaries() -> DatabaseBinaries {
        DatabaseBinaries::new("/bin/db").with_runtime_assertions("/bin/db-assertions")
    }

    #[test_case(false, 0.0, 0.5, "/bin/db"; "probability zero")]
    #[test_case(false, 0.6, 0.5, "/bin/db-assertions"; "roll under probability")]
    #[test_case(false, 0.4, 0.5, "/bin/db"; "roll over probability")]
    #[test_case(true, 0.0, 0.99, "/bin/db-assertions"; "seed forces assertions")]
    fn selection(seed_set: bool, probability: f64, roll: f64, expected: &str) {
        let logger = MemoryLogger::new();
        let selector = BinarySelector::new(binaries(), false, probability);
        assert_eq!(selector.select_with(&logger, || seed_set, || roll), expected);
    }

    #[test]
    fn choice_is_cached_and_logged_once() {
        let logger = MemoryLogger::new();
        let selector = BinarySelector::new(binaries(), false, 0.5);
        assert_eq!(selector.select_with(&logger, || false, || 0.1), "/bin/db-assertions");
        assert_eq!(
            selector.select_with(&logger, || false, || 0.9),
            "/bin/db-assertions",
            "the first choice sticks"
        );
        assert_eq!(logger.lines(), ["runtime assertions enabled"]);
    }

    #[test]
    fn benchmarks_use_standard_binary() {
        let logger = MemoryLogger::new();
        let selector = BinarySelector::new(binaries(), true, 1.0);
        assert_eq!(selector.select_with(&logger, || true, || 0.0), "/bin/db");
        assert_eq!(
            logger.lines(),
            ["benchmark test, running with standard binary"]
        );
    }

    #[test]
    fn missing_assertions_binary_falls_back() {
        let logger = MemoryLogger::new();
        let selector = BinarySelector::new(DatabaseBinaries::new("/bin/db"), false, 1.0);
        assert_eq!(selector.select_with(&logger, || true, || 0.0), "/bin/db");
        assert_eq!(
            logger.lines(),
            [
                "running without runtime assertions since the corresponding binary was not \
                 specified",
                "runtime assertions disabled",
            ]
        );
    }
}
