// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Harness configuration.
//!
//! The embedded `default-config.toml` is always loaded first. `.config/clustertest.toml` under the
//! workspace root (or an explicitly specified file) is layered on top of it.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Harness configuration, resolved against a workspace root.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    workspace_root: Utf8PathBuf,
    inner: HarnessConfigImpl,
}

impl HarnessConfig {
    /// The path, relative to the workspace root, at which config is read by default.
    pub const CONFIG_PATH: &'static str = ".config/clustertest.toml";

    /// The default config, embedded at build time.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the embedded defaults and `config_file`.
    ///
    /// If `config_file` is `None`, [`Self::CONFIG_PATH`] is read if it exists.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let inner = Self::read_from_sources(&workspace_root, config_file)?;
        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default config.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (inner, _unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// The workspace root this config was resolved against.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// The directory per-test artifact directories are created in.
    pub fn artifacts_dir(&self) -> Utf8PathBuf {
        self.workspace_root.join(&self.inner.artifacts_dir)
    }

    /// How long failure reporting waits for a detail log to be written.
    pub fn detail_log_timeout(&self) -> Duration {
        self.inner.detail_log_timeout
    }

    /// The probability that a non-benchmark test gets the runtime-assertions binary.
    pub fn runtime_assertions_probability(&self) -> f64 {
        self.inner.runtime_assertions_probability
    }

    /// How often liveness watchers poll nodes.
    pub fn node_watch_interval(&self) -> Duration {
        self.inner.node_watch_interval
    }

    /// Defaults for sysbench workloads.
    pub fn sysbench(&self) -> &SysbenchDefaults {
        &self.inner.sysbench
    }

    // ---
    // Helper methods
    // ---

    fn read_from_sources(
        workspace_root: &Utf8Path,
        file: Option<&Utf8Path>,
    ) -> Result<HarnessConfigImpl, ConfigParseError> {
        let (config_file, source) = match file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warn!(
                %config_file,
                "ignoring unknown config keys: {}",
                unknown.iter().join(", ")
            );
        }
        config
            .validate()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok(config)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(HarnessConfigImpl, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: HarnessConfigImpl =
            serde_path_to_error::deserialize(ignored_de).map_err(|error| {
                // The config crate reports the key as well: drop it for consistency with
                // serde_path_to_error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Defaults for sysbench workloads.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SysbenchDefaults {
    /// How long the workload runs.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// The number of client threads.
    pub concurrency: usize,

    /// The number of tables.
    pub tables: usize,

    /// The number of rows per table.
    pub rows_per_table: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HarnessConfigImpl {
    artifacts_dir: Utf8PathBuf,
    #[serde(with = "humantime_serde")]
    detail_log_timeout: Duration,
    runtime_assertions_probability: f64,
    #[serde(with = "humantime_serde")]
    node_watch_interval: Duration,
    sysbench: SysbenchDefaults,
}

impl HarnessConfigImpl {
    fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        if !(0.0..=1.0).contains(&self.runtime_assertions_probability) {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "runtime-assertions-probability",
                reason: format!(
                    "{} is not between 0 and 1",
                    self.runtime_assertions_probability
                ),
            });
        }
        if self.node_watch_interval.is_zero() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "node-watch-interval",
                reason: "must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}
