// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Walking error cause chains.
//!
//! Failures keep structured errors around so that they can later be classified by kind ("was this
//! a cancellation?", "does this carry ownership metadata?"). The helpers here answer those
//! questions for any `dyn Error`, independent of how the chain was built.

use std::{error::Error, fmt, sync::Arc};

/// A shareable, type-erased error.
///
/// Failures hold on to errors reported by test code as `DynError`s, so that downcasting through
/// [`Error::source`] continues to work after the failure has been recorded.
pub type DynError = Arc<dyn Error + Send + Sync + 'static>;

/// An iterator over an error and its transitive sources, outermost first.
#[derive(Clone, Debug)]
pub struct ErrorChain<'a> {
    next: Option<&'a (dyn Error + 'static)>,
}

impl<'a> ErrorChain<'a> {
    /// Creates a new chain starting at `err`.
    pub fn new(err: &'a (dyn Error + 'static)) -> Self {
        Self { next: Some(err) }
    }

    /// Returns the first (outermost) error in the chain of type `K`.
    pub fn find<K: Error + 'static>(self) -> Option<&'a K> {
        self.filter_map(|err| err.downcast_ref::<K>()).next()
    }

    /// Returns the innermost error in the chain of type `K`.
    ///
    /// This is the value reached by repeatedly unwrapping for as long as the remainder of the
    /// chain still contains a `K`.
    pub fn innermost<K: Error + 'static>(self) -> Option<&'a K> {
        self.filter_map(|err| err.downcast_ref::<K>()).last()
    }

    /// Returns true if any error in the chain is of type `K`.
    pub fn contains<K: Error + 'static>(self) -> bool {
        self.find::<K>().is_some()
    }
}

impl<'a> Iterator for ErrorChain<'a> {
    type Item = &'a (dyn Error + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.source();
        Some(current)
    }
}

/// Displays an error followed by each of its causes, one per line.
#[derive(Clone, Copy, Debug)]
pub struct DisplayErrorChain<'a> {
    err: &'a (dyn Error + 'static),
}

impl<'a> DisplayErrorChain<'a> {
    /// Creates a new display wrapper for `err`.
    pub fn new(err: &'a (dyn Error + 'static)) -> Self {
        Self { err }
    }
}

impl fmt::Display for DisplayErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.err)?;
        for cause in ErrorChain::new(self.err).skip(1) {
            write!(f, "\n  caused by: {cause}")?;
        }
        Ok(())
    }
}

/// Displays an error followed by each of its causes on a single line, separated by `: `.
#[derive(Clone, Copy, Debug)]
pub struct InlineErrorChain<'a> {
    err: &'a (dyn Error + 'static),
}

impl<'a> InlineErrorChain<'a> {
    /// Creates a new display wrapper for `err`.
    pub fn new(err: &'a (dyn Error + 'static)) -> Self {
        Self { err }
    }
}

impl fmt::Display for InlineErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.err)?;
        for cause in ErrorChain::new(self.err).skip(1) {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// Extension trait to obtain an [`ErrorChain`] from an error.
pub trait ErrorChainExt {
    /// Returns an iterator over this error and its sources.
    fn chain(&self) -> ErrorChain<'_>;
}

impl ErrorChainExt for dyn Error + 'static {
    fn chain(&self) -> ErrorChain<'_> {
        ErrorChain::new(self)
    }
}

impl ErrorChainExt for dyn Error + Send + Sync + 'static {
    fn chain(&self) -> ErrorChain<'_> {
        ErrorChain::new(self)
    }
}
