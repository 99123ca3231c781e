// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unwind signals for execution units.
//!
//! Fatal failures and skips terminate the *reporting* unit immediately. Test code propagates an
//! [`Unwind`] with `?` (or `return Err(..)`) up to the top of the unit, where it is recovered by
//! [`run_test`](crate::harness::run_test) or [`TestContext::spawn_unit`](crate::harness::TestContext::spawn_unit).
//! Other units keep running until they observe cancellation.

use std::{any::Any, fmt};

/// Why an execution unit stopped early.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use = "an unwind signal must be propagated to the top of the execution unit"]
pub enum Unwind {
    /// A fatal failure was recorded. The failure itself lives in the test state.
    Fatal,

    /// The test was skipped. Skips are not failures.
    Skip,
}

impl Unwind {
    /// Returns true if this is a fatal unwind.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Returns true if this is a skip.
    pub fn is_skip(self) -> bool {
        matches!(self, Self::Skip)
    }
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => f.write_str("test fatal"),
            Self::Skip => f.write_str("test skipped"),
        }
    }
}

/// The result type returned by test logic.
pub type TestResult<T = ()> = Result<T, Unwind>;

/// The reason a test was skipped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SkipReason {
    /// The main message.
    pub reason: String,

    /// Additional details, possibly empty.
    pub details: String,
}

/// Extracts the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
