// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Execution-state core for clustertest, a harness for tests that run against multi-node database
//! clusters.
//!
//! A test run is represented by a [`TestState`](test_state::TestState), shared by the test body
//! (the main unit) and any helper units it spawns. Units report status and progress through it,
//! and report failures that are aggregated, classified, and written to per-failure detail logs.
//! The first fatal failure cancels the test's scope so that every unit can unwind.
//!
//! [`harness::run_test`] runs a test body and produces its [`TestOutcome`](harness::TestOutcome).
//! Workload drivers such as [`workload::sysbench`] use [`monitor::MonitorGroup`] to run the
//! workload alongside cluster watchers.

pub mod binary;
pub mod cancel;
pub mod chain;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod failure;
pub mod harness;
mod helpers;
pub mod logger;
pub mod monitor;
pub mod owner;
pub mod status;
mod stopwatch;
pub mod test_state;
pub mod unit;
pub mod unwind;
pub mod worker;
pub mod workload;
