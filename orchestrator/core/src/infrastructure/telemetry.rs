// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tracing subscriber setup for the provisioner process.

use crate::domain::provisioner_config::ObservabilityConfig;
use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

/// Build the log filter. `RUST_LOG` wins over the configured level.
pub fn log_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")
}

/// Build a compact or JSON subscriber without installing it.
pub fn build_subscriber(config: &ObservabilityConfig) -> Result<Box<dyn Subscriber + Send + Sync>> {
    let config = &config.logging;
    let filter = log_filter(&config.level)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    Ok(match config.format.as_str() {
        "json" => Box::new(builder.json().finish()),
        _ => Box::new(builder.compact().finish()),
    })
}

/// Install the global subscriber. Returns an error if one is already set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let subscriber = build_subscriber(config)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
