// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-unit status and progress.

use crate::unit::UnitId;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// The latest status reported by one execution unit.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusRecord {
    message: String,
    time: Instant,
    progress: f64,
}

impl StatusRecord {
    /// The status message. Empty if the unit only ever reported progress.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// When the record was last written.
    pub fn time(&self) -> Instant {
        self.time
    }

    /// How long ago the record was last written.
    pub fn age(&self) -> Duration {
        self.time.elapsed()
    }

    /// The last progress value reported by the unit.
    ///
    /// This is stored exactly as reported: callers are expected to pass a fraction in `[0, 1]`,
    /// and display layers clamp.
    pub fn progress(&self) -> f64 {
        self.progress
    }
}

/// A mapping from execution unit to its latest [`StatusRecord`].
///
/// Writes are last-writer-wins per unit. A reader always observes a record as a whole: message,
/// time and progress are updated together.
#[derive(Debug, Default)]
pub struct StatusTable {
    records: Mutex<HashMap<UnitId, StatusRecord>>,
}

impl StatusTable {
    /// Creates an empty status table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status message for `unit`, keeping its previously reported progress.
    pub fn set(&self, unit: UnitId, message: String) {
        let mut records = self.lock();
        let progress = records.get(&unit).map_or(0.0, |record| record.progress);
        records.insert(
            unit,
            StatusRecord {
                message,
                time: Instant::now(),
                progress,
            },
        );
    }

    /// Removes the record for `unit`, marking it idle.
    pub fn clear(&self, unit: UnitId) -> Option<StatusRecord> {
        self.lock().remove(&unit)
    }

    /// Sets the progress for `unit`, creating an empty-message record if none exists.
    pub fn set_progress(&self, unit: UnitId, frac: f64) {
        self.lock()
            .entry(unit)
            .and_modify(|record| record.progress = frac)
            .or_insert_with(|| StatusRecord {
                message: String::new(),
                time: Instant::now(),
                progress: frac,
            });
    }

    /// Returns a copy of the record for `unit`, or `None` if the unit is idle or unknown.
    pub fn get(&self, unit: UnitId) -> Option<StatusRecord> {
        self.lock().get(&unit).cloned()
    }

    /// Returns a copy of every record, ordered by unit.
    pub fn snapshot(&self) -> Vec<(UnitId, StatusRecord)> {
        let mut records: Vec<_> = self
            .lock()
            .iter()
            .map(|(unit, record)| (*unit, record.clone()))
            .collect();
        records.sort_unstable_by_key(|(unit, _)| *unit);
        records
    }

    /// Returns the number of units with a record.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no unit has a record.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UnitId, StatusRecord>> {
        // A panic while holding this lock can't leave a record half-written: every write is a
        // single insert or remove.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}
