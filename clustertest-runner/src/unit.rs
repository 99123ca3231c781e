// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution-unit identities.
//!
//! Every concurrently-running piece of test logic (the main unit that runs the test body, and any
//! helper units it spawns) is identified by a [`UnitId`]. The identity is obtained once when the
//! unit starts and is passed explicitly to every status and progress call.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// The identity of an execution unit within a single test run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct UnitId(u64);

impl UnitId {
    /// Returns the raw numeric value of this identity.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Hands out unique unit identities for one test run.
///
/// The first identity allocated is reserved for the main unit.
#[derive(Debug)]
pub(crate) struct UnitAllocator {
    next: AtomicU64,
}

impl UnitAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub(crate) fn allocate(&self) -> UnitId {
        UnitId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
