// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! sdserver logging.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `SDSERVER_LOGGING_CONFIG_PATH` environment variable.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `SDSERVER_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters can be configured using the `SDSERVER_LOG` environment variable or by setting the
//! `log_filters` key in the TOML configuration file.
//!
//! Example:
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "sdserver::schema" = "debug"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::{LocalTime, SystemTime};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::environment_names::logging as env_logging;
use crate::config::{disable_ansi_logging, jsonl_logging_enabled, use_local_timezone};

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::from([
                ("figment".to_string(), "error".to_string()),
                ("clap".to_string(), "error".to_string()),
            ]),
        }
    }
}

/// Initialize the global subscriber. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = setup_logging() {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    });
}

fn setup_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = filters(load_config()?);

    if jsonl_logging_enabled() {
        let l = fmt::layer()
            .json()
            .flatten_event(true)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    } else if use_local_timezone() {
        let l = fmt::layer()
            .compact()
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(!disable_ansi_logging())
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    } else {
        let l = fmt::layer()
            .compact()
            .with_timer(SystemTime)
            .with_ansi(!disable_ansi_logging())
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    }
    Ok(())
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config
        .log_level
        .parse::<Directive>()
        .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into());
    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(env_logging::SDSERVER_LOG)
        .from_env_lossy();

    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> Result<LoggingConfig, figment::Error> {
    let mut figment = Figment::new().merge(Serialized::defaults(LoggingConfig::default()));
    if let Ok(path) = std::env::var(env_logging::SDSERVER_LOGGING_CONFIG_PATH) {
        figment = figment.merge(Toml::file(path));
    }
    figment.extract()
}
