//! This module defines basic configuration structures which can be loaded based on a set of
//! environment variables.
//!
//! # Source
//! The [`SourceConfig`] structure is defined by (and loaded from) the following set of
//! environment variables:
//!  - `SOURCE__LOCATION` is where the broker logs are read from, either an S3 prefix
//!    (`s3://bucket/prefix/`) or a local file or directory
//!  - `SOURCE__RETRIES` specifies how many times a failed file download is retried
//!  - `SOURCE__RETRY_DELAY` is the delay in milliseconds between download retries
//!
//! ## Example setup
//! ```bash
//! export SOURCE__LOCATION="s3://msk-logs/AWSLogs/000123456789/KafkaBrokerLogs/"
//! export SOURCE__RETRIES=3
//! export SOURCE__RETRY_DELAY=1000
//! ```
//!
//! # Inventory
//! The [`InventoryConfig`] structure is defined by (and loaded from) the following set of
//! environment variables:
//!  - `INVENTORY__OUTPUT` is the path of the output file
//!  - `INVENTORY__FORMAT` is either `csv` (default) or `json`
//!  - `INVENTORY__KEY_BY_IP` specifies whether the client address is part of the identity of a
//!    client (`true`) or not (`false`, default)
//!
//! # Telemetry
//!  - `METRICS__FILE` is an optional path the batch metrics are written to when the run ends, in
//!    the Prometheus text format
//!  - `LOKI__URL` is an optional Grafana Loki endpoint that `tracing` logs are published to
//!
//! # Application
//! The [`Config`] structure represents the whole application configuration and additionally is
//! defined by (and loaded from) the following set of environment variables:
//!  - `RUST_LOG` is the standard Rust log configuration string
//!  - `NUM_WORKERS` is the number of log files fetched and parsed concurrently
//!
//! # Example setup
//! ```bash
//! export RUST_LOG=client_inventory=INFO,aws_config=WARN
//! export NUM_WORKERS=8
//! ```
use anyhow::{anyhow, bail, Result};
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::sink::OutputFormat;
use crate::trace::KeySchema;

#[inline(always)]
fn default_retries() -> u64 {
    2
}

#[inline(always)]
fn default_retry_delay() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub location: String,
    #[serde(default = "default_retries")]
    pub retries: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

#[inline(always)]
fn default_output() -> String {
    "client_inventory.csv".to_string()
}

#[inline(always)]
fn default_format() -> String {
    "csv".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub key_by_ip: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            format: default_format(),
            key_by_ip: false,
        }
    }
}

impl InventoryConfig {
    #[inline]
    pub fn output_format(&self) -> Result<OutputFormat> {
        self.format.parse().map_err(|e: Error| anyhow!(e))
    }

    #[inline]
    pub fn key_schema(&self) -> KeySchema {
        KeySchema::new(self.key_by_ip)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    pub file: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LokiConfig {
    pub url: Option<Url>,
}

#[inline(always)]
fn default_num_workers() -> usize {
    4
}

#[inline(always)]
fn default_rust_log() -> String {
    "INFO".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub loki: LokiConfig,
}

impl Config {
    #[inline]
    pub fn from_env() -> Result<Self> {
        Self::from_builder(
            config::Config::builder().add_source(config::Environment::default().separator("__")),
        )
    }

    /// Builds and validates the configuration from an arbitrary set of sources.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let cfg: Self = builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| anyhow!(Error::Config(e)))?;

        if cfg.num_workers == 0 {
            bail!(Error::ConfigValue("num_workers"));
        }

        // fail early on an unknown output format
        cfg.inventory.output_format()?;

        Ok(cfg)
    }
}
