// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by clustertest.

use crate::{
    chain::{DynError, ErrorChain},
    cluster::NodeList,
};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error, fmt};
use thiserror::Error;

/// A boxed error returned by monitored tasks and cluster operations.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// An error that occurred while parsing the harness config.
#[derive(Debug, Error)]
#[error("failed to parse clustertest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file the error was found in.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while assembling the config sources.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A value was outside of its valid range.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The key that was invalid.
        key: &'static str,

        /// Why the value was rejected.
        reason: String,
    },
}

/// Returned by an operation that observed a cancelled scope.
///
/// Classification code checks for this kind through cause chains to tell apart failures caused by
/// cancellation from primary failures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// An error returned by [`MonitorGroup::wait`](crate::monitor::MonitorGroup::wait).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum MonitorError {
    /// A task returned an error.
    Task {
        /// The registration index of the task.
        index: usize,

        /// The name of the task.
        name: String,

        /// The error returned by the task.
        err: DynError,
    },

    /// A task panicked.
    TaskPanicked {
        /// The registration index of the task.
        index: usize,

        /// The name of the task.
        name: String,

        /// The panic message, if it could be extracted.
        message: String,
    },
}

impl MonitorError {
    /// Returns the registration index of the task that failed.
    pub fn index(&self) -> usize {
        match self {
            Self::Task { index, .. } | Self::TaskPanicked { index, .. } => *index,
        }
    }

    /// Returns the name of the task that failed.
    pub fn name(&self) -> &str {
        match self {
            Self::Task { name, .. } | Self::TaskPanicked { name, .. } => name,
        }
    }

    /// Returns true if the task failed only because it observed cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Task { err, .. } => ErrorChain::new(&**err).contains::<Cancelled>(),
            Self::TaskPanicked { .. } => false,
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task { name, .. } => write!(f, "monitor task `{name}` failed"),
            Self::TaskPanicked { name, message, .. } => {
                write!(f, "monitor task `{name}` panicked: {message}")
            }
        }
    }
}

impl Error for MonitorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            // Point at the task's error itself, not the Arc, so downcasts keep working.
            Self::Task { err, .. } => Some(&**err),
            Self::TaskPanicked { .. } => None,
        }
    }
}

/// An error returned by a [`Cluster`](crate::cluster::Cluster) operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The operation observed cancellation before completing.
    #[error("cluster operation cancelled")]
    Cancelled(#[from] Cancelled),

    /// A command exited with a nonzero status.
    #[error("command `{command}` on nodes {nodes} exited with status {status}")]
    NonZeroExit {
        /// The command that was run.
        command: String,

        /// The nodes the command was run on.
        nodes: NodeList,

        /// The remote exit status.
        status: i32,

        /// Standard error of the command, possibly truncated.
        stderr: String,
    },

    /// One or more nodes were found dead while being watched.
    #[error("nodes died: {nodes}")]
    NodesDied {
        /// The nodes that died.
        nodes: NodeList,
    },

    /// The cluster backend failed to carry out an operation.
    #[error("cluster operation `{operation}` failed")]
    Backend {
        /// The operation that failed.
        operation: String,

        /// The underlying error.
        #[source]
        err: BoxError,
    },
}

impl ClusterError {
    /// Wraps a backend error for `operation`.
    pub fn backend(operation: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Self::Backend {
            operation: operation.into(),
            err: err.into(),
        }
    }
}

/// An error that occurred while comparing against the build version of a test.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildVersionError {
    /// The minimum version could not be parsed.
    #[error("failed to parse minimum version `{input}`")]
    Parse {
        /// The input that failed to parse.
        input: String,

        /// The underlying error.
        #[source]
        err: semver::Error,
    },

    /// The minimum version had a prerelease component.
    #[error("minimum version `{input}` cannot specify a prerelease (found `{prerelease}`)")]
    Prerelease {
        /// The input.
        input: String,

        /// The prerelease component.
        prerelease: String,
    },

    /// The test has no build version to compare against.
    #[error("no build version is known for this test")]
    Unknown,
}

/// An error produced by a [`TestLogger`](crate::logger::TestLogger).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoggerError {
    /// The logger has been closed.
    #[error("logger is closed")]
    Closed,

    /// A log file could not be created.
    #[error("error creating log file `{path}`")]
    Create {
        /// The path that couldn't be created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// An error occurred while writing to a log.
    #[error("error writing to log `{name}`")]
    Write {
        /// The name of the log.
        name: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurred while exporting sysbench results.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SysbenchExportError {
    /// No line of the output was a per-second report.
    #[error("no lines started with expected format: {pattern}")]
    NoMatchingLines {
        /// The pattern lines are matched against.
        pattern: &'static str,
    },

    /// A report line had an unexpected number of fields.
    #[error(
        "metrics output in unexpected format on line {line_number}, \
         expected {expected} fields got: {actual}"
    )]
    UnexpectedFieldCount {
        /// The 1-based line number in the output.
        line_number: usize,

        /// The expected number of fields.
        expected: usize,

        /// The actual number of fields.
        actual: usize,
    },

    /// The per-operation QPS field had an unexpected number of components.
    #[error(
        "QPS metrics output in unexpected format on line {line_number}, \
         expected {expected} fields got: {actual}"
    )]
    UnexpectedQpsFieldCount {
        /// The 1-based line number in the output.
        line_number: usize,

        /// The expected number of components.
        expected: usize,

        /// The actual number of components.
        actual: usize,
    },

    /// A snapshot could not be serialized.
    #[error("error serializing metrics snapshot")]
    Serialize(#[source] serde_json::Error),

    /// The stats file could not be written.
    #[error("error writing stats to `{path}`")]
    Write {
        /// The path being written to.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}
