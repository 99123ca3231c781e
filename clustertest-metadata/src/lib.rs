// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable output for clustertest.
//!
//! This crate contains the serializable types produced by `clustertest-runner`: per-second
//! workload snapshots exported for performance dashboards, worker summaries rendered by the
//! progress surface, and test outcome summaries consumed by issue-posting tooling.
//!
//! The types here carry no runtime state, so downstream consumers can depend
//! on this crate without pulling in the execution core.

mod exit_codes;
mod outcome;
mod perf;
mod progress;

pub use exit_codes::*;
pub use outcome::*;
pub use perf::*;
pub use progress::*;
