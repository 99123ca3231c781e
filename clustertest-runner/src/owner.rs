// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test ownership metadata carried on errors.

use crate::chain::DynError;
use std::{error::Error, fmt, sync::Arc};

/// The team that owns a test or a failure.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Owner(String);

impl Owner {
    /// The test engineering team, owner of the harness itself and of benchmarks.
    pub const TEST_ENG: &'static str = "test-eng";

    /// Creates a new owner from a team identifier.
    pub fn new(team: impl Into<String>) -> Self {
        Self(team.into())
    }

    /// Returns the test engineering owner.
    pub fn test_eng() -> Self {
        Self::new(Self::TEST_ENG)
    }

    /// Returns the team identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An error that routes a failure to a specific owning team.
///
/// Test code (or shared helpers) wrap errors in `ErrorWithOwnership` when they know which team
/// should investigate, regardless of who owns the test that hit the error. Classification finds
/// these through the cause chain of recorded failures.
#[derive(Clone, Debug)]
pub struct ErrorWithOwnership {
    owner: Owner,
    title_override: Option<String>,
    infra_flake: bool,
    err: DynError,
}

impl ErrorWithOwnership {
    /// Attributes `err` to `owner`.
    pub fn new(owner: Owner, err: impl Error + Send + Sync + 'static) -> Self {
        Self::from_dyn(owner, Arc::new(err))
    }

    /// Attributes an already type-erased error to `owner`.
    pub fn from_dyn(owner: Owner, err: DynError) -> Self {
        Self {
            owner,
            title_override: None,
            infra_flake: false,
            err,
        }
    }

    /// Overrides the title used when the failure is posted as an issue.
    pub fn with_title_override(mut self, title: impl Into<String>) -> Self {
        self.title_override = Some(title.into());
        self
    }

    /// Marks the failure as caused by infrastructure flakiness rather than the system under test.
    pub fn with_infra_flake(mut self) -> Self {
        self.infra_flake = true;
        self
    }

    /// The owning team.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The title override, if any.
    pub fn title_override(&self) -> Option<&str> {
        self.title_override.as_deref()
    }

    /// Whether this failure was caused by infrastructure flakiness.
    pub fn is_infra_flake(&self) -> bool {
        self.infra_flake
    }
}

impl fmt::Display for ErrorWithOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owned by {}", self.owner)
    }
}

impl Error for ErrorWithOwnership {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        // Point directly at the wrapped error (not the Arc) so that downcasts further down the
        // chain see the original type.
        Some(&*self.err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{DisplayErrorChain, ErrorChain};
    use std::io;

    #[test]
    fn source_is_the_wrapped_error() {
        let err = ErrorWithOwnership::new(
            Owner::new("kv"),
            io::Error::new(io::ErrorKind::TimedOut, "disk stall"),
        )
        .with_infra_flake();

        assert_eq!(err.to_string(), "owned by kv");
        assert_eq!(
            DisplayErrorChain::new(&err).to_string(),
            "owned by kv\n  caused by: disk stall",
            "the wrapped message appears once"
        );
        assert!(err.is_infra_flake());
        let io_err = ErrorChain::new(&err)
            .find::<io::Error>()
            .expect("io error reachable through chain");
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }
}
